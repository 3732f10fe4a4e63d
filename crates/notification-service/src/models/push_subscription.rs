//! 推送订阅实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Web Push 订阅
///
/// (user_id, endpoint) 唯一；推送服务返回 gone 时 is_active 置为 false
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[sqlx(default)]
    pub user_agent: Option<String>,
    pub is_active: bool,
    #[sqlx(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 推送加密密钥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

impl PushSubscription {
    pub fn keys(&self) -> PushKeys {
        PushKeys {
            p256dh: self.p256dh.clone(),
            auth: self.auth.clone(),
        }
    }
}
