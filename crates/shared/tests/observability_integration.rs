//! 可观测性与配置模块集成测试
//!
//! 覆盖指标记录函数与配置分层加载的核心行为。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use notify_shared::observability::metrics::{
        record_batch_result, record_channel_delivery, record_notification_created,
        record_scheduled_execution, set_active_connections, set_worker_last_run,
    };

    #[test]
    fn test_record_channel_delivery() {
        for channel in ["in_app", "websocket", "email", "push", "sms"] {
            record_channel_delivery(channel, "delivered", 0.01);
            record_channel_delivery(channel, "failed", 1.5);
        }
    }

    #[test]
    fn test_record_lifecycle_metrics() {
        record_notification_created("study", "urgent", false);
        record_notification_created("task", "low", true);
        record_scheduled_execution("success");
        record_scheduled_execution("failure");
        record_batch_result(0, 0);
        set_active_connections(0);
        set_worker_last_run("batch_processor");
    }
}

// ============================================================================
// 配置加载测试
// ============================================================================

mod config_tests {
    use std::io::Write;

    use notify_shared::config::AppConfig;

    #[test]
    fn test_load_from_config_dir() {
        let dir = std::env::temp_dir().join(format!("notify-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("default.toml")).unwrap();
        writeln!(
            file,
            "[notification.scheduler]\npoll_interval_secs = 5\n\n[notification.realtime]\nmax_connections_per_user = 3"
        )
        .unwrap();

        // SAFETY: 集成测试进程内只有此测试修改 CONFIG_DIR
        unsafe {
            std::env::set_var("CONFIG_DIR", &dir);
        }
        let config = AppConfig::load("notification-service").unwrap();
        unsafe {
            std::env::remove_var("CONFIG_DIR");
        }

        assert_eq!(config.service_name, "notification-service");
        assert_eq!(config.notification.scheduler.poll_interval_secs, 5);
        assert_eq!(config.notification.scheduler.batch_size, 100);
        assert_eq!(config.notification.realtime.max_connections_per_user, 3);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
