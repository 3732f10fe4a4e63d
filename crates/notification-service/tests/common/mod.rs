//! 集成测试公共装配：内存存储 + 假传输

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notification_service::identity::StaticIdentityProvider;
use notification_service::models::PushKeys;
use notification_service::repository::MemoryStore;
use notification_service::transport::{
    EmailError, EmailTransport, PushError, PushPayload, PushTransport,
};
use notification_service::{Adapters, NotificationEngine, Stores};
use notify_shared::config::NotificationConfig;

/// 记录所有发出的邮件
#[derive(Default)]
pub struct RecordingEmailTransport {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingEmailTransport {
    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmailTransport {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<String, EmailError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), subject.to_string()));
        Ok(format!("<{}@test.local>", sent.len()))
    }
}

/// 指定 endpoint 返回 Gone，其余成功
#[derive(Default)]
pub struct FakePushTransport {
    pub gone: HashSet<String>,
    pub delivered: AtomicUsize,
}

impl FakePushTransport {
    pub fn with_gone(endpoints: &[&str]) -> Self {
        Self {
            gone: endpoints.iter().map(|e| e.to_string()).collect(),
            delivered: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PushTransport for FakePushTransport {
    async fn send(
        &self,
        endpoint: &str,
        _keys: &PushKeys,
        _payload: &PushPayload,
    ) -> Result<(), PushError> {
        if self.gone.contains(endpoint) {
            return Err(PushError::Gone);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestEngine {
    pub engine: NotificationEngine,
    pub store: Arc<MemoryStore>,
    pub email: Arc<RecordingEmailTransport>,
    pub push: Arc<FakePushTransport>,
}

pub fn config() -> NotificationConfig {
    let mut config = NotificationConfig::default();
    config.scheduler.enabled = false;
    config.delivery.channel_timeout_ms = 2_000;
    config.batch.concurrency = 3;
    config
}

pub fn identity() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_token("token-alice", "alice")
        .with_token("token-bob", "bob")
        .with_email("alice", "alice@example.com")
        .with_email("bob", "bob@example.com")
}

pub fn build(store: Arc<MemoryStore>, push: FakePushTransport) -> TestEngine {
    build_with(store.clone(), Stores::memory(store), push)
}

pub fn build_with(store: Arc<MemoryStore>, stores: Stores, push: FakePushTransport) -> TestEngine {
    let email = Arc::new(RecordingEmailTransport::default());
    let push = Arc::new(push);
    let adapters = Adapters {
        identity: Arc::new(identity()),
        email: email.clone(),
        push: push.clone(),
    };

    TestEngine {
        engine: NotificationEngine::build(&config(), stores, adapters),
        store,
        email,
        push,
    }
}

pub fn engine() -> TestEngine {
    build(Arc::new(MemoryStore::new()), FakePushTransport::default())
}
