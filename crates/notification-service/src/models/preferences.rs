//! 用户通知偏好实体定义

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DeliveryChannel, NotificationCategory, NotificationPriority};

pub const DEFAULT_QUIET_HOURS_START: &str = "22:00";
pub const DEFAULT_QUIET_HOURS_END: &str = "08:00";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// 分类偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPreference {
    pub enabled: bool,
    /// 该分类允许的渠道
    pub channels: Vec<DeliveryChannel>,
    #[serde(default)]
    pub default_priority: Option<NotificationPriority>,
}

/// 用户通知偏好
///
/// 每个用户一条，首次访问时以默认值懒创建
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub id: Uuid,
    pub user_id: String,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub sms_enabled: bool,
    pub quiet_hours_enabled: bool,
    /// 本地时间 HH:mm
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
    /// IANA 时区名
    pub timezone: String,
    #[sqlx(json)]
    pub category_preferences: HashMap<NotificationCategory, CategoryPreference>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// 默认偏好：邮件/推送/站内开启，短信关闭，免打扰关闭
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            email_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            sms_enabled: false,
            quiet_hours_enabled: false,
            quiet_hours_start: DEFAULT_QUIET_HOURS_START.to_string(),
            quiet_hours_end: DEFAULT_QUIET_HOURS_END.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            category_preferences: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 渠道全局开关
    ///
    /// websocket 是站内列表的实时镜像，跟随站内开关
    pub fn channel_enabled(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::InApp | DeliveryChannel::Websocket => self.in_app_enabled,
            DeliveryChannel::Email => self.email_enabled,
            DeliveryChannel::Push => self.push_enabled,
            DeliveryChannel::Sms => self.sms_enabled,
        }
    }

    pub fn category(&self, category: NotificationCategory) -> Option<&CategoryPreference> {
        self.category_preferences.get(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = NotificationPreferences::defaults_for("user-1");
        assert!(prefs.email_enabled && prefs.push_enabled && prefs.in_app_enabled);
        assert!(!prefs.sms_enabled);
        assert!(!prefs.quiet_hours_enabled);
        assert_eq!(prefs.timezone, "UTC");
    }

    #[test]
    fn test_websocket_follows_in_app() {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.in_app_enabled = false;
        assert!(!prefs.channel_enabled(DeliveryChannel::Websocket));
        assert!(prefs.channel_enabled(DeliveryChannel::Email));
    }

    #[test]
    fn test_category_map_serialization() {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.category_preferences.insert(
            NotificationCategory::Social,
            CategoryPreference {
                enabled: false,
                channels: vec![DeliveryChannel::InApp],
                default_priority: None,
            },
        );
        let value = serde_json::to_value(&prefs.category_preferences).unwrap();
        assert_eq!(value["social"]["enabled"], serde_json::json!(false));
    }
}
