//! 免打扰时段计算
//!
//! 按用户时区取本地时刻，用分钟数比较 HH:mm 区间；start > end 时区间跨越午夜。

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::models::NotificationPreferences;

/// 解析 `HH:mm`，小时 0~23、分钟 0~59
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// 解析 IANA 时区名，非法时回退 UTC
pub fn parse_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "无法识别的时区，按 UTC 处理");
            Tz::UTC
        }
    }
}

/// 本地日期时间转回 UTC；夏令时跳变的空隙时刻顺延一小时
pub(crate) fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// 用户的免打扰窗口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime, tz: Tz) -> Self {
        Self { start, end, tz }
    }

    /// 从偏好构造；未启用或时刻格式非法时返回 None（视为不在免打扰中）
    pub fn from_preferences(prefs: &NotificationPreferences) -> Option<Self> {
        if !prefs.quiet_hours_enabled {
            return None;
        }

        let (Some(start), Some(end)) = (
            parse_hhmm(&prefs.quiet_hours_start),
            parse_hhmm(&prefs.quiet_hours_end),
        ) else {
            warn!(
                user_id = %prefs.user_id,
                start = %prefs.quiet_hours_start,
                end = %prefs.quiet_hours_end,
                "免打扰时段格式非法，忽略"
            );
            return None;
        };

        Some(Self::new(start, end, parse_timezone(&prefs.timezone)))
    }

    /// 当前时刻是否处于免打扰窗口（两端包含）
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = minute_of_day(now.with_timezone(&self.tz).time());
        let start = minute_of_day(self.start);
        let end = minute_of_day(self.end);

        if start > end {
            local >= start || local <= end
        } else {
            local >= start && local <= end
        }
    }

    /// 下一个可投递时刻：本地今天的结束时刻，已过则取明天
    pub fn next_available(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.tz);
        let today = local_now.date_naive();

        let date = if minute_of_day(local_now.time()) > minute_of_day(self.end) {
            today.succ_opt().unwrap_or(today)
        } else {
            today
        };

        local_to_utc(self.tz, date, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn window(start: &str, end: &str, tz: &str) -> QuietHours {
        QuietHours::new(
            parse_hhmm(start).unwrap(),
            parse_hhmm(end).unwrap(),
            parse_timezone(tz),
        )
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("08:30"), NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(parse_hhmm("7:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert!(parse_hhmm("24:00").is_none());
        assert!(parse_hhmm("0830").is_none());
        assert!(parse_hhmm("ab:cd").is_none());
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
        assert_eq!(parse_timezone("Asia/Shanghai"), Tz::Asia__Shanghai);
    }

    #[test]
    fn test_wrapping_window() {
        let quiet = window("22:00", "08:00", "UTC");
        assert!(quiet.contains(at("2026-03-10T23:30:00Z")));
        assert!(quiet.contains(at("2026-03-10T03:00:00Z")));
        assert!(quiet.contains(at("2026-03-10T08:00:00Z")));
        assert!(!quiet.contains(at("2026-03-10T12:00:00Z")));
    }

    #[test]
    fn test_plain_window() {
        let quiet = window("12:00", "14:00", "UTC");
        assert!(quiet.contains(at("2026-03-10T13:00:00Z")));
        assert!(!quiet.contains(at("2026-03-10T14:01:00Z")));
        assert!(!quiet.contains(at("2026-03-10T11:59:00Z")));
    }

    #[test]
    fn test_window_uses_local_time() {
        // 上海 UTC+8：UTC 15:00 即本地 23:00
        let quiet = window("22:00", "08:00", "Asia/Shanghai");
        assert!(quiet.contains(at("2026-03-10T15:00:00Z")));
        assert!(!quiet.contains(at("2026-03-10T05:00:00Z")));
    }

    #[test]
    fn test_next_available_before_end_is_today() {
        let quiet = window("22:00", "08:00", "UTC");
        assert_eq!(
            quiet.next_available(at("2026-03-10T03:00:00Z")),
            at("2026-03-10T08:00:00Z")
        );
    }

    #[test]
    fn test_next_available_after_end_is_tomorrow() {
        let quiet = window("22:00", "08:00", "UTC");
        assert_eq!(
            quiet.next_available(at("2026-03-10T23:00:00Z")),
            at("2026-03-11T08:00:00Z")
        );
    }

    #[test]
    fn test_next_available_in_user_timezone() {
        // 纽约 3 月 10 日已是夏令时 UTC-4，本地 23:00 → 次日本地 08:00 = 12:00Z
        let quiet = window("22:00", "08:00", "America/New_York");
        assert_eq!(
            quiet.next_available(at("2026-03-11T03:00:00Z")),
            at("2026-03-11T12:00:00Z")
        );
    }

    #[test]
    fn test_disabled_preferences() {
        let prefs = NotificationPreferences::defaults_for("user-1");
        assert!(QuietHours::from_preferences(&prefs).is_none());

        let mut prefs = prefs;
        prefs.quiet_hours_enabled = true;
        assert!(QuietHours::from_preferences(&prefs).is_some());

        prefs.quiet_hours_start = "late".to_string();
        assert!(QuietHours::from_preferences(&prefs).is_none());
    }
}
