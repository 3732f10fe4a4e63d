//! 投递结果类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeliveryChannel, DeliveryOutcome, DeliveryStatus};

/// 单渠道投递结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    /// 失败原因（失败时）
    pub failure_reason: Option<String>,
    /// 外部系统消息 ID（成功时）
    pub external_id: Option<String>,
    /// 渠道附加信息，写入投递记录的 metadata
    pub metadata: serde_json::Value,
    /// 发送耗时（毫秒）
    pub duration_ms: u64,
}

impl ChannelResult {
    /// 创建成功结果
    pub fn delivered(channel: DeliveryChannel, external_id: Option<String>, duration_ms: u64) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Delivered,
            failure_reason: None,
            external_id,
            metadata: serde_json::json!({}),
            duration_ms,
        }
    }

    /// 创建失败结果
    pub fn failed(channel: DeliveryChannel, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Failed,
            failure_reason: Some(reason.into()),
            external_id: None,
            metadata: serde_json::json!({}),
            duration_ms,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// 转换为投递记录终态
    pub fn to_outcome(&self, at: DateTime<Utc>) -> DeliveryOutcome {
        DeliveryOutcome {
            status: self.status,
            external_id: self.external_id.clone(),
            failure_reason: self.failure_reason.clone(),
            metadata: self.metadata.clone(),
            at,
        }
    }
}

/// 一条通知的整体投递报告
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub notification_id: Uuid,
    pub channel_results: Vec<ChannelResult>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl DeliveryReport {
    pub fn new(notification_id: Uuid, channel_results: Vec<ChannelResult>, duration_ms: u64) -> Self {
        Self {
            notification_id,
            channel_results,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.channel_results.iter().filter(|r| r.is_delivered()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.channel_results.len() - self.success_count()
    }

    pub fn is_partial_success(&self) -> bool {
        let success_count = self.success_count();
        success_count > 0 && success_count < self.channel_results.len()
    }

    pub fn delivered_on(&self, channel: DeliveryChannel) -> bool {
        self.channel_results
            .iter()
            .any(|r| r.channel == channel && r.is_delivered())
    }

    pub fn result_for(&self, channel: DeliveryChannel) -> Option<&ChannelResult> {
        self.channel_results.iter().find(|r| r.channel == channel)
    }
}
