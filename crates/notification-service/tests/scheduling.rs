//! 定时与周期通知

mod common;

use chrono::{Duration, Utc};
use notification_service::models::{NotificationQuery, RecurringInterval, RecurringRule};
use notification_service::service::dto::ScheduleNotificationRequest;

#[tokio::test]
async fn weekly_schedule_stops_after_max_occurrences() {
    let t = common::engine();
    let start = Utc::now() - Duration::minutes(1);

    let mut rule = RecurringRule::new(RecurringInterval::Weekly);
    rule.max_occurrences = Some(3);
    let schedule = t
        .engine
        .schedules
        .create(ScheduleNotificationRequest {
            user_id: "alice".to_string(),
            title: Some("Weekly review".to_string()),
            message: Some("Plan your week".to_string()),
            scheduled_at: start,
            recurring: Some(rule),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut fire_times = Vec::new();
    for _ in 0..4 {
        let current = t.engine.schedules.get("alice", schedule.id).await.unwrap();
        let now = current.scheduled_at + Duration::seconds(1);
        t.engine.scheduler().tick(now).await.unwrap();
        fire_times.push(current.scheduled_at);
    }

    let stored = t.engine.schedules.get("alice", schedule.id).await.unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.execution_count, 3);
    assert_eq!(fire_times[1] - fire_times[0], Duration::days(7));
    assert_eq!(fire_times[2] - fire_times[1], Duration::days(7));

    let page = t
        .engine
        .notifications
        .list("alice", &NotificationQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert!(page.items.iter().all(|n| n.title == "Weekly review"));
}

#[tokio::test]
async fn cancelled_schedule_never_fires() {
    let t = common::engine();
    let schedule = t
        .engine
        .schedules
        .create(ScheduleNotificationRequest {
            user_id: "alice".to_string(),
            title: Some("Reminder".to_string()),
            message: Some("Stretch".to_string()),
            scheduled_at: Utc::now() - Duration::minutes(1),
            ..Default::default()
        })
        .await
        .unwrap();

    t.engine.schedules.cancel("alice", schedule.id).await.unwrap();
    let summary = t.engine.scheduler().tick(Utc::now()).await.unwrap();

    assert_eq!(summary.executed, 0);
    assert_eq!(t.engine.notifications.unread_count("alice").await.unwrap(), 0);
}
