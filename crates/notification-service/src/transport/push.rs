//! 推送传输
//!
//! `HttpPushTransport` 把加密与协议细节交给推送中继服务，
//! 这里只负责 POST 请求并把 404/410 识别为订阅失效。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::PushConfig;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::PushKeys;

/// 推送发送错误
#[derive(Debug, Error)]
pub enum PushError {
    /// 订阅已失效，调用方应停用该订阅
    #[error("推送订阅已失效")]
    Gone,

    #[error("推送失败: {0}")]
    Failed(String),
}

impl PushError {
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// 推送载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// 点击行为等附加数据
    pub data: serde_json::Value,
}

/// 推送传输接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        keys: &PushKeys,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// 按配置选择传输：配置了 relay_url 用 HTTP 中继，否则只写日志
pub fn from_config(config: &PushConfig, timeout: Duration) -> Arc<dyn PushTransport> {
    let Some(relay_url) = config.relay_url.clone() else {
        info!("未配置推送中继，推送仅记录日志");
        return Arc::new(LogPushTransport);
    };

    match HttpPushTransport::new(relay_url, config.relay_api_key.clone(), timeout) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!(error = %e, "创建推送客户端失败，推送仅记录日志");
            Arc::new(LogPushTransport)
        }
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    endpoint: &'a str,
    keys: &'a PushKeys,
    payload: &'a PushPayload,
}

/// HTTP 推送中继传输
pub struct HttpPushTransport {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
}

impl HttpPushTransport {
    pub fn new(
        relay_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Failed(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            relay_url,
            api_key,
        })
    }
}

/// 推送服务对已注销订阅返回 404 或 410
fn classify_status(status: StatusCode) -> Result<(), PushError> {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone),
        s if s.is_success() => Ok(()),
        s => Err(PushError::Failed(format!("中继返回 HTTP {s}"))),
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(
        &self,
        endpoint: &str,
        keys: &PushKeys,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let mut request = self.client.post(&self.relay_url).json(&RelayRequest {
            endpoint,
            keys,
            payload,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Failed(e.to_string()))?;

        debug!(endpoint = %endpoint, status = %response.status(), "推送中继已响应");
        classify_status(response.status())
    }
}

/// 日志推送传输，用于开发环境
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send(
        &self,
        endpoint: &str,
        _keys: &PushKeys,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        info!(endpoint = %endpoint, title = %payload.title, "推送（仅日志）");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::CREATED).is_ok());
        assert!(classify_status(StatusCode::GONE).unwrap_err().is_gone());
        assert!(classify_status(StatusCode::NOT_FOUND).unwrap_err().is_gone());
        assert!(!classify_status(StatusCode::BAD_GATEWAY).unwrap_err().is_gone());
    }

    #[test]
    fn test_payload_skips_empty_fields() {
        let payload = PushPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            icon: None,
            badge: Some("/badge.png".to_string()),
            data: serde_json::json!({"url": "/tasks"}),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("icon").is_none());
        assert_eq!(value["badge"], "/badge.png");
    }
}
