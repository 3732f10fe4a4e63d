//! 实时推送
//!
//! - `rooms`: 房间式发布订阅原语
//! - `registry`: 用户/连接注册表
//! - `gateway`: 握手、消息处理与事件扇出，实现 `Broadcaster`
//! - `ws`: axum WebSocket 接入

pub mod gateway;
pub mod message;
pub mod registry;
pub mod rooms;
pub mod ws;

pub use gateway::NotificationGateway;
pub use message::{ClientMessage, ConnectionId, ServerEvent};
pub use registry::{ConnectionMeta, ConnectionRegistry, Registration};
pub use rooms::RoomHub;
