//! 通知引擎装配
//!
//! 把存储、身份、传输适配器与各组件组装成可运行的引擎：
//!
//! ```text
//! RoomHub -> ConnectionRegistry -> NotificationGateway (Broadcaster)
//!                                        |
//! channels(in_app/websocket/email/push/sms) -> DeliveryDispatcher
//!                                        |
//!           services -> NotificationScheduler / BatchProcessor
//! ```

use std::sync::Arc;
use std::time::Duration;

use notify_shared::config::NotificationConfig;
use sqlx::PgPool;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    BatchService, NotificationService, PreferenceService, PushSubscriptionService,
    ScheduleService, TemplateService,
};
use crate::identity::{IdentityProvider, JwtIdentityProvider};
use crate::notification::{
    Broadcaster, DeliveryDispatcher, EmailChannel, InAppChannel, PushChannel, SmsChannel,
    WebsocketChannel,
};
use crate::realtime::{ConnectionRegistry, NotificationGateway, RoomHub};
use crate::repository::{
    BatchRepository, BatchRepositoryTrait, DeliveryAttemptRepository,
    DeliveryAttemptRepositoryTrait, MemoryStore, NotificationRepository,
    NotificationRepositoryTrait, PreferenceRepository, PreferenceRepositoryTrait,
    PushSubscriptionRepository, PushSubscriptionRepositoryTrait, ScheduleRepository,
    ScheduleRepositoryTrait, TemplateRepository, TemplateRepositoryTrait,
};
use crate::transport::{self, EmailTransport, PushTransport};
use crate::worker::{BatchProcessor, NotificationScheduler};

/// 各实体的仓储
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationRepositoryTrait>,
    pub attempts: Arc<dyn DeliveryAttemptRepositoryTrait>,
    pub templates: Arc<dyn TemplateRepositoryTrait>,
    pub preferences: Arc<dyn PreferenceRepositoryTrait>,
    pub schedules: Arc<dyn ScheduleRepositoryTrait>,
    pub batches: Arc<dyn BatchRepositoryTrait>,
    pub push_subscriptions: Arc<dyn PushSubscriptionRepositoryTrait>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            notifications: Arc::new(NotificationRepository::new(pool.clone())),
            attempts: Arc::new(DeliveryAttemptRepository::new(pool.clone())),
            templates: Arc::new(TemplateRepository::new(pool.clone())),
            preferences: Arc::new(PreferenceRepository::new(pool.clone())),
            schedules: Arc::new(ScheduleRepository::new(pool.clone())),
            batches: Arc::new(BatchRepository::new(pool.clone())),
            push_subscriptions: Arc::new(PushSubscriptionRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            notifications: store.clone(),
            attempts: store.clone(),
            templates: store.clone(),
            preferences: store.clone(),
            schedules: store.clone(),
            batches: store.clone(),
            push_subscriptions: store,
        }
    }
}

/// 外部依赖适配器
#[derive(Clone)]
pub struct Adapters {
    pub identity: Arc<dyn IdentityProvider>,
    pub email: Arc<dyn EmailTransport>,
    pub push: Arc<dyn PushTransport>,
}

impl Adapters {
    /// 生产配置：JWT 认证 + users 表邮箱，SMTP / 推送中继按配置启用
    pub fn from_config(config: &NotificationConfig, pool: PgPool) -> Self {
        let timeout = Duration::from_millis(config.delivery.channel_timeout_ms);
        Self {
            identity: Arc::new(JwtIdentityProvider::new(&config.auth, pool)),
            email: transport::email::from_config(&config.email),
            push: transport::push::from_config(&config.push, timeout),
        }
    }
}

/// 通知引擎
pub struct NotificationEngine {
    pub notifications: Arc<NotificationService>,
    pub preferences: Arc<PreferenceService>,
    pub templates: Arc<TemplateService>,
    pub push_subscriptions: Arc<PushSubscriptionService>,
    pub schedules: Arc<ScheduleService>,
    pub batches: Arc<BatchService>,
    pub gateway: Arc<NotificationGateway>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    scheduler: Arc<NotificationScheduler>,
    scheduler_enabled: bool,
    shutdown: watch::Sender<bool>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationEngine {
    pub fn build(config: &NotificationConfig, stores: Stores, adapters: Adapters) -> Self {
        // 实时推送
        let hub = Arc::new(RoomHub::new());
        let registry = Arc::new(ConnectionRegistry::new(
            hub,
            config.realtime.max_connections_per_user,
        ));
        let gateway = Arc::new(NotificationGateway::new(
            registry,
            adapters.identity.clone(),
            stores.notifications.clone(),
            config.realtime.clone(),
        ));
        let broadcaster: Arc<dyn Broadcaster> = gateway.clone();

        // 投递
        let dispatcher = Arc::new(
            DeliveryDispatcher::new(
                stores.notifications.clone(),
                stores.attempts.clone(),
                Duration::from_millis(config.delivery.channel_timeout_ms),
            )
            .with_channel(Arc::new(InAppChannel::new(stores.notifications.clone())))
            .with_channel(Arc::new(WebsocketChannel::new(broadcaster.clone())))
            .with_channel(Arc::new(EmailChannel::new(
                adapters.identity.clone(),
                adapters.email.clone(),
                config.email.from_name.clone(),
            )))
            .with_channel(Arc::new(PushChannel::new(
                stores.push_subscriptions.clone(),
                adapters.push.clone(),
            )))
            .with_channel(Arc::new(SmsChannel)),
        );

        // 服务
        let notifications = Arc::new(NotificationService::new(
            stores.notifications.clone(),
            stores.attempts.clone(),
            stores.templates.clone(),
            stores.preferences.clone(),
            dispatcher.clone(),
            broadcaster,
        ));
        let processor = Arc::new(BatchProcessor::new(
            stores.batches.clone(),
            stores.templates.clone(),
            notifications.clone(),
            config.batch.concurrency,
        ));
        let scheduler = Arc::new(NotificationScheduler::new(
            stores.schedules.clone(),
            notifications.clone(),
            &config.scheduler,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            preferences: Arc::new(PreferenceService::new(stores.preferences.clone())),
            templates: Arc::new(TemplateService::new(stores.templates.clone())),
            push_subscriptions: Arc::new(PushSubscriptionService::new(
                stores.push_subscriptions.clone(),
            )),
            schedules: Arc::new(ScheduleService::new(
                stores.schedules.clone(),
                stores.templates.clone(),
            )),
            batches: Arc::new(BatchService::new(stores.batches.clone(), processor)),
            notifications,
            gateway,
            dispatcher,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
            shutdown,
            scheduler_task: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Arc<NotificationScheduler> {
        &self.scheduler
    }

    /// 启动网关后台任务与调度器
    pub async fn start(&self) {
        self.gateway.start().await;

        if !self.scheduler_enabled {
            warn!("定时调度已禁用");
            return;
        }

        let mut task = self.scheduler_task.lock().await;
        if task.is_none() {
            self.shutdown.send_replace(false);
            let scheduler = Arc::clone(&self.scheduler);
            let shutdown_rx = self.shutdown.subscribe();
            *task = Some(tokio::spawn(async move {
                scheduler.run(shutdown_rx).await;
            }));
        }
        info!("通知引擎已启动");
    }

    /// 停止调度器并断开所有实时连接
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.scheduler_task.lock().await.take() {
            let _ = handle.await;
        }
        self.gateway.stop().await;
        info!("通知引擎已停止");
    }
}
