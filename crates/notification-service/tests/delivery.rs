//! 渠道解析、免打扰与投递的端到端行为

mod common;

use chrono::{Duration, NaiveTime};
use notification_service::models::{
    DeliveryChannel, DeliveryStatus, NotificationPriority, NotificationStatus, PushKeys,
};
use notification_service::notification::channels::push::NO_ACTIVE_SUBSCRIPTIONS;
use notification_service::service::dto::{
    CreateNotificationRequest, CreateTemplateRequest, SubscribePushRequest,
    UpdatePreferencesRequest,
};
use serde_json::json;

use common::FakePushTransport;

async fn enable_all_day_quiet_hours(t: &common::TestEngine, user_id: &str) {
    t.engine
        .preferences
        .update(
            user_id,
            UpdatePreferencesRequest {
                quiet_hours_enabled: Some(true),
                quiet_hours_start: Some("00:00".to_string()),
                quiet_hours_end: Some("23:59".to_string()),
                timezone: Some("UTC".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn in_app_is_forced_when_every_channel_is_disabled() {
    let t = common::engine();
    t.engine
        .preferences
        .update(
            "alice",
            UpdatePreferencesRequest {
                email_enabled: Some(false),
                push_enabled: Some(false),
                in_app_enabled: Some(false),
                sms_enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (notification, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("alice", "Hi", "There")
                .with_channels(vec![DeliveryChannel::Email, DeliveryChannel::Push]),
        )
        .await
        .unwrap();

    assert_eq!(notification.channels, vec![DeliveryChannel::InApp]);
    assert!(report.unwrap().delivered_on(DeliveryChannel::InApp));
    assert!(t.email.recipients().is_empty());
}

#[tokio::test]
async fn urgent_during_quiet_hours_adds_email_and_sends_now() {
    let t = common::engine();
    enable_all_day_quiet_hours(&t, "alice").await;

    let (notification, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("alice", "Exam moved", "Exam is tomorrow")
                .with_channels(vec![DeliveryChannel::InApp])
                .with_priority(NotificationPriority::Urgent),
        )
        .await
        .unwrap();

    assert!(notification.scheduled_at.is_none());
    assert_eq!(
        notification.channels,
        vec![DeliveryChannel::InApp, DeliveryChannel::Email]
    );
    let report = report.unwrap();
    assert!(report.delivered_on(DeliveryChannel::Email));
    assert_eq!(t.email.recipients(), vec!["alice@example.com".to_string()]);
}

#[tokio::test]
async fn non_urgent_during_quiet_hours_is_deferred_to_window_end() {
    let t = common::engine();
    enable_all_day_quiet_hours(&t, "alice").await;

    let (notification, report) = t
        .engine
        .notifications
        .create_and_deliver(CreateNotificationRequest::literal("alice", "Tip", "Take a break"))
        .await
        .unwrap();

    assert!(report.is_none());
    let expected = notification
        .created_at
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap())
        .and_utc();
    assert_eq!(notification.scheduled_at, Some(expected));
    assert_eq!(notification.status, NotificationStatus::Pending);
    assert!(
        t.engine
            .notifications
            .delivery_attempts("alice", notification.id)
            .await
            .unwrap()
            .is_empty()
    );

    // 时段结束后由调度器投递
    let summary = t
        .engine
        .scheduler()
        .tick(expected + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(summary.deferred_delivered, 1);

    let attempts = t
        .engine
        .notifications
        .delivery_attempts("alice", notification.id)
        .await
        .unwrap();
    assert!(
        attempts
            .iter()
            .any(|a| a.channel == DeliveryChannel::InApp && a.status == DeliveryStatus::Delivered)
    );
    let stored = t.engine.notifications.get("alice", notification.id).await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Delivered);
}

#[tokio::test]
async fn reading_a_deferred_notification_keeps_its_delivery() {
    let t = common::engine();
    enable_all_day_quiet_hours(&t, "alice").await;

    let (notification, _) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("alice", "Weekly plan", "Review goals")
                .with_channels(vec![DeliveryChannel::InApp, DeliveryChannel::Email]),
        )
        .await
        .unwrap();
    let due = notification.scheduled_at.unwrap();

    assert_eq!(
        t.engine
            .notifications
            .mark_read("alice", &[notification.id])
            .await
            .unwrap(),
        1
    );
    let stored = t.engine.notifications.get("alice", notification.id).await.unwrap();
    assert!(stored.is_read);
    assert_eq!(stored.status, NotificationStatus::Pending);

    let summary = t
        .engine
        .scheduler()
        .tick(due + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(summary.deferred_delivered, 1);
    assert_eq!(t.email.recipients(), vec!["alice@example.com".to_string()]);

    let attempts = t
        .engine
        .notifications
        .delivery_attempts("alice", notification.id)
        .await
        .unwrap();
    assert!(
        attempts
            .iter()
            .any(|a| a.channel == DeliveryChannel::Email && a.status == DeliveryStatus::Delivered)
    );
    let stored = t.engine.notifications.get("alice", notification.id).await.unwrap();
    assert!(stored.is_read);
    assert_eq!(stored.status, NotificationStatus::Read);
}

#[tokio::test]
async fn mark_all_read_is_idempotent() {
    let t = common::engine();
    for i in 0..3 {
        t.engine
            .notifications
            .create_and_deliver(CreateNotificationRequest::literal("alice", format!("n{i}"), "m"))
            .await
            .unwrap();
    }
    assert_eq!(t.engine.notifications.unread_count("alice").await.unwrap(), 3);

    assert_eq!(t.engine.notifications.mark_all_read("alice").await.unwrap(), 3);
    assert_eq!(t.engine.notifications.mark_all_read("alice").await.unwrap(), 0);
    assert_eq!(t.engine.notifications.unread_count("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn template_renders_variables_and_keeps_unknown_placeholders() {
    let t = common::engine();
    let template = t
        .engine
        .templates
        .create(CreateTemplateRequest {
            name: "assignment_due".to_string(),
            title: "{{kind}} Due: {{assignment}}".to_string(),
            message: "Submit {{assignment}} before {{deadline}}".to_string(),
            notification_type: Default::default(),
            category: Default::default(),
            priority: Default::default(),
            default_channels: vec![DeliveryChannel::InApp],
            variables: None,
            metadata: Some(json!({"source": "planner"})),
        })
        .await
        .unwrap();

    let (notification, _) = t
        .engine
        .notifications
        .create_and_deliver(CreateNotificationRequest::templated(
            "alice",
            template.id,
            json!({"kind": "Task", "assignment": "Algebra HW"}),
        ))
        .await
        .unwrap();

    assert_eq!(notification.title, "Task Due: Algebra HW");
    assert_eq!(notification.message, "Submit Algebra HW before {{deadline}}");
    assert_eq!(notification.template_id, Some(template.id));
    assert_eq!(notification.metadata["source"], json!("planner"));
}

#[tokio::test]
async fn gone_push_subscription_is_deactivated() {
    let t = common::build(
        std::sync::Arc::new(notification_service::repository::MemoryStore::new()),
        FakePushTransport::with_gone(&["https://push.example/dead"]),
    );
    for endpoint in ["https://push.example/live", "https://push.example/dead"] {
        t.engine
            .push_subscriptions
            .subscribe(
                "alice",
                SubscribePushRequest {
                    endpoint: endpoint.to_string(),
                    keys: PushKeys {
                        p256dh: "key".to_string(),
                        auth: "auth".to_string(),
                    },
                    user_agent: None,
                },
            )
            .await
            .unwrap();
    }

    let (_, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("alice", "Push", "Body")
                .with_channels(vec![DeliveryChannel::Push]),
        )
        .await
        .unwrap();
    let report = report.unwrap();
    assert!(report.delivered_on(DeliveryChannel::Push));

    let subscriptions = t.engine.push_subscriptions.list("alice").await.unwrap();
    let dead = subscriptions
        .iter()
        .find(|s| s.endpoint == "https://push.example/dead")
        .unwrap();
    let live = subscriptions
        .iter()
        .find(|s| s.endpoint == "https://push.example/live")
        .unwrap();
    assert!(!dead.is_active);
    assert!(live.is_active);

    // 只剩失效订阅时推送失败
    let (_, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("bob", "Push", "Body")
                .with_channels(vec![DeliveryChannel::Push]),
        )
        .await
        .unwrap();
    let push = report.unwrap().result_for(DeliveryChannel::Push).cloned().unwrap();
    assert_eq!(push.status, DeliveryStatus::Failed);
    assert_eq!(push.failure_reason.as_deref(), Some(NO_ACTIVE_SUBSCRIPTIONS));
}

#[tokio::test]
async fn channel_failures_never_fail_creation() {
    let t = common::engine();
    let (notification, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("carol", "Hi", "No email on file")
                .with_channels(vec![DeliveryChannel::Email, DeliveryChannel::Sms]),
        )
        .await
        .unwrap();

    let report = report.unwrap();
    assert_eq!(report.success_count(), 0);
    let stored = t.engine.notifications.get("carol", notification.id).await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Failed);
}
