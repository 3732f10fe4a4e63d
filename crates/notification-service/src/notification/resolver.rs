//! 渠道解析
//!
//! 根据用户偏好、分类规则与免打扰时段计算有效渠道集合，
//! 并决定是否需要延后投递。
//!
//! ## 规则
//!
//! 1. 全局开关关闭的渠道被移除（websocket 跟随站内开关）
//! 2. 分类有配置时与其允许渠道求交集；分类被禁用时清空，urgent 除外
//! 3. 结果为空时强制加入站内信
//! 4. 处于免打扰时段：urgent 保留渠道并强制加入邮件，其余保留渠道并延后到时段结束

use chrono::{DateTime, Utc};
use tracing::debug;

use super::quiet_hours::QuietHours;
use crate::models::{
    DeliveryChannel, NotificationCategory, NotificationPreferences, NotificationPriority,
};

/// 请求未指定渠道时使用
pub const DEFAULT_CHANNELS: [DeliveryChannel; 2] =
    [DeliveryChannel::InApp, DeliveryChannel::Websocket];

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChannels {
    /// 有序、去重且非空
    pub channels: Vec<DeliveryChannel>,
    pub priority: NotificationPriority,
    /// 需要延后投递时为免打扰结束时刻
    pub defer_until: Option<DateTime<Utc>>,
}

impl ResolvedChannels {
    pub fn is_deferred(&self) -> bool {
        self.defer_until.is_some()
    }
}

/// 渠道解析器
///
/// 纯计算，不访问存储；当前时刻由调用方传入
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelResolver;

impl ChannelResolver {
    pub fn new() -> Self {
        Self
    }

    /// 请求未指定优先级时取分类默认优先级，否则 medium
    pub fn resolve_priority(
        &self,
        requested: Option<NotificationPriority>,
        category: NotificationCategory,
        prefs: Option<&NotificationPreferences>,
    ) -> NotificationPriority {
        requested
            .or_else(|| {
                prefs
                    .and_then(|p| p.category(category))
                    .and_then(|c| c.default_priority)
            })
            .unwrap_or_default()
    }

    /// 计算有效渠道；偏好缺失时视为全部开启
    pub fn resolve(
        &self,
        requested: &[DeliveryChannel],
        category: NotificationCategory,
        priority: NotificationPriority,
        prefs: Option<&NotificationPreferences>,
        now: DateTime<Utc>,
    ) -> ResolvedChannels {
        let mut channels = dedup(requested);

        if let Some(prefs) = prefs {
            channels.retain(|c| prefs.channel_enabled(*c));

            if let Some(rule) = prefs.category(category) {
                if !rule.enabled && !priority.is_urgent() {
                    channels.clear();
                } else {
                    channels.retain(|c| rule.channels.contains(c));
                }
            }
        }

        if channels.is_empty() {
            debug!(category = category.as_str(), "无可用渠道，回退到站内信");
            channels.push(DeliveryChannel::InApp);
        }

        let quiet = prefs
            .and_then(QuietHours::from_preferences)
            .filter(|q| q.contains(now));

        let defer_until = match quiet {
            Some(_) if priority.is_urgent() => {
                if !channels.contains(&DeliveryChannel::Email) {
                    channels.push(DeliveryChannel::Email);
                }
                None
            }
            Some(quiet) => Some(quiet.next_available(now)),
            None => None,
        };

        ResolvedChannels {
            channels,
            priority,
            defer_until,
        }
    }
}

fn dedup(channels: &[DeliveryChannel]) -> Vec<DeliveryChannel> {
    let mut out = Vec::with_capacity(channels.len());
    for channel in channels {
        if !out.contains(channel) {
            out.push(*channel);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryPreference;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn quiet_prefs() -> NotificationPreferences {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.quiet_hours_enabled = true;
        prefs
    }

    #[test]
    fn test_no_preferences_keeps_requested() {
        let resolved = ChannelResolver::new().resolve(
            &[DeliveryChannel::Email, DeliveryChannel::Push, DeliveryChannel::Email],
            NotificationCategory::Task,
            NotificationPriority::Medium,
            None,
            Utc::now(),
        );
        assert_eq!(
            resolved.channels,
            vec![DeliveryChannel::Email, DeliveryChannel::Push]
        );
        assert!(!resolved.is_deferred());
    }

    #[test]
    fn test_all_disabled_forces_in_app() {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.email_enabled = false;
        prefs.push_enabled = false;

        let resolved = ChannelResolver::new().resolve(
            &[DeliveryChannel::Email, DeliveryChannel::Push, DeliveryChannel::Sms],
            NotificationCategory::Study,
            NotificationPriority::Low,
            Some(&prefs),
            Utc::now(),
        );
        assert_eq!(resolved.channels, vec![DeliveryChannel::InApp]);
    }

    #[test]
    fn test_category_intersection() {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.category_preferences.insert(
            NotificationCategory::Goal,
            CategoryPreference {
                enabled: true,
                channels: vec![DeliveryChannel::InApp, DeliveryChannel::Email],
                default_priority: Some(NotificationPriority::High),
            },
        );

        let resolver = ChannelResolver::new();
        let resolved = resolver.resolve(
            &[DeliveryChannel::Push, DeliveryChannel::Email],
            NotificationCategory::Goal,
            NotificationPriority::Medium,
            Some(&prefs),
            Utc::now(),
        );
        assert_eq!(resolved.channels, vec![DeliveryChannel::Email]);
        assert_eq!(
            resolver.resolve_priority(None, NotificationCategory::Goal, Some(&prefs)),
            NotificationPriority::High
        );
        assert_eq!(
            resolver.resolve_priority(None, NotificationCategory::Task, Some(&prefs)),
            NotificationPriority::Medium
        );
    }

    #[test]
    fn test_disabled_category_respects_urgent() {
        let mut prefs = NotificationPreferences::defaults_for("user-1");
        prefs.category_preferences.insert(
            NotificationCategory::Social,
            CategoryPreference {
                enabled: false,
                channels: vec![DeliveryChannel::Email],
                default_priority: None,
            },
        );
        let resolver = ChannelResolver::new();

        let normal = resolver.resolve(
            &[DeliveryChannel::Email],
            NotificationCategory::Social,
            NotificationPriority::High,
            Some(&prefs),
            Utc::now(),
        );
        assert_eq!(normal.channels, vec![DeliveryChannel::InApp]);

        let urgent = resolver.resolve(
            &[DeliveryChannel::Email],
            NotificationCategory::Social,
            NotificationPriority::Urgent,
            Some(&prefs),
            Utc::now(),
        );
        assert_eq!(urgent.channels, vec![DeliveryChannel::Email]);
    }

    #[test]
    fn test_urgent_in_quiet_hours_adds_email() {
        let mut prefs = quiet_prefs();
        prefs.email_enabled = false;

        let resolved = ChannelResolver::new().resolve(
            &[DeliveryChannel::InApp],
            NotificationCategory::System,
            NotificationPriority::Urgent,
            Some(&prefs),
            at("2026-03-10T23:00:00Z"),
        );
        assert!(resolved.channels.contains(&DeliveryChannel::Email));
        assert!(!resolved.is_deferred());
    }

    #[test]
    fn test_non_urgent_in_quiet_hours_defers() {
        let resolved = ChannelResolver::new().resolve(
            &[DeliveryChannel::InApp, DeliveryChannel::Email],
            NotificationCategory::Task,
            NotificationPriority::High,
            Some(&quiet_prefs()),
            at("2026-03-10T23:00:00Z"),
        );
        assert_eq!(
            resolved.channels,
            vec![DeliveryChannel::InApp, DeliveryChannel::Email]
        );
        assert_eq!(resolved.defer_until, Some(at("2026-03-11T08:00:00Z")));
    }

    #[test]
    fn test_outside_quiet_hours_not_deferred() {
        let resolved = ChannelResolver::new().resolve(
            &DEFAULT_CHANNELS,
            NotificationCategory::Task,
            NotificationPriority::Low,
            Some(&quiet_prefs()),
            at("2026-03-10T12:00:00Z"),
        );
        assert!(!resolved.is_deferred());
    }
}
