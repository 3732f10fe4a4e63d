//! 房间式发布订阅
//!
//! 每个连接持有一个有界 mpsc 发送端，连接可以加入任意数量的房间，
//! 按房间名广播事件。所有映射使用 DashMap，按分片加锁。

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use super::message::{ConnectionId, ServerEvent};

/// 房间中心
#[derive(Debug, Default)]
pub struct RoomHub {
    senders: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    /// 房间名 → 成员
    rooms: DashMap<String, HashSet<ConnectionId>>,
    /// 连接 → 所在房间（反向索引）
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接入连接
    pub fn attach(&self, connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        self.senders.insert(connection_id, sender);
        self.memberships.entry(connection_id).or_default();
    }

    /// 断开连接并离开所有房间，返回离开的房间
    pub fn detach(&self, connection_id: ConnectionId) -> Vec<String> {
        self.senders.remove(&connection_id);
        let rooms = self
            .memberships
            .remove(&connection_id)
            .map(|(_, rooms)| rooms)
            .unwrap_or_default();

        for room in &rooms {
            self.remove_member(room, connection_id);
        }
        rooms.into_iter().collect()
    }

    pub fn is_attached(&self, connection_id: ConnectionId) -> bool {
        self.senders.contains_key(&connection_id)
    }

    /// 加入房间，已在房间中时返回 false
    pub fn join(&self, connection_id: ConnectionId, room: &str) -> bool {
        if !self.is_attached(connection_id) {
            return false;
        }

        let added = self
            .memberships
            .entry(connection_id)
            .or_default()
            .insert(room.to_string());
        if added {
            self.rooms
                .entry(room.to_string())
                .or_default()
                .insert(connection_id);
        }
        added
    }

    /// 离开房间，不在房间中时返回 false
    pub fn leave(&self, connection_id: ConnectionId, room: &str) -> bool {
        let removed = self
            .memberships
            .get_mut(&connection_id)
            .is_some_and(|mut rooms| rooms.remove(room));
        if removed {
            self.remove_member(room, connection_id);
        }
        removed
    }

    fn remove_member(&self, room: &str, connection_id: ConnectionId) {
        let now_empty = self.rooms.get_mut(room).is_some_and(|mut members| {
            members.remove(&connection_id);
            members.is_empty()
        });
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// 发送给单个连接
    pub fn emit_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self.senders.get(&connection_id).map(|s| s.value().clone()) else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    connection_id = %connection_id,
                    event = event.event_name(),
                    "连接发送缓冲区已满，丢弃消息"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 向房间广播，返回成功投递的连接数
    pub fn emit(&self, room: &str, event: &ServerEvent) -> usize {
        self.emit_many(&[room], event)
    }

    /// 向多个房间的并集广播，同一连接只收到一次
    pub fn emit_many(&self, rooms: &[&str], event: &ServerEvent) -> usize {
        let mut targets = HashSet::new();
        for room in rooms {
            targets.extend(self.members(room));
        }

        targets
            .into_iter()
            .filter(|id| self.emit_to(*id, event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn attach(hub: &RoomHub) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let id = Uuid::now_v7();
        hub.attach(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn test_join_emit_leave() {
        let hub = RoomHub::new();
        let (a, mut rx_a) = attach(&hub);
        let (b, mut rx_b) = attach(&hub);

        assert!(hub.join(a, "user:1"));
        assert!(!hub.join(a, "user:1"));
        assert!(hub.join(b, "user:1"));

        let delivered = hub.emit("user:1", &ServerEvent::UnreadCountUpdated { count: 1 });
        assert_eq!(delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());

        assert!(hub.leave(a, "user:1"));
        assert_eq!(hub.members("user:1"), vec![b]);
    }

    #[tokio::test]
    async fn test_emit_many_deduplicates() {
        let hub = RoomHub::new();
        let (a, mut rx) = attach(&hub);
        hub.join(a, "user:1");
        hub.join(a, "category:task");

        let delivered = hub.emit_many(
            &["user:1", "category:task", "type:info"],
            &ServerEvent::UnreadCountUpdated { count: 1 },
        );
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_cleans_rooms() {
        let hub = RoomHub::new();
        let (a, _rx) = attach(&hub);
        hub.join(a, "user:1");
        hub.join(a, "type:info");

        let mut left = hub.detach(a);
        left.sort();
        assert_eq!(left, vec!["type:info", "user:1"]);
        assert_eq!(hub.room_count(), 0);
        assert!(!hub.join(a, "user:1"));
    }
}
