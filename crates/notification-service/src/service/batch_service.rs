//! 批量通知服务
//!
//! 创建批次记录（pending）后交给 `BatchProcessor` 处理，
//! 调用方可以随时通过 `get` 查询进度。

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::dto::CreateBatchRequest;
use crate::error::{NotificationError, Result};
use crate::models::{BatchStatus, NotificationBatch};
use crate::repository::BatchRepositoryTrait;
use crate::worker::BatchProcessor;

pub struct BatchService {
    batches: Arc<dyn BatchRepositoryTrait>,
    processor: Arc<BatchProcessor>,
}

impl BatchService {
    pub fn new(batches: Arc<dyn BatchRepositoryTrait>, processor: Arc<BatchProcessor>) -> Self {
        Self { batches, processor }
    }

    /// 创建批次并在后台处理，立即返回 pending 状态的批次
    #[instrument(skip(self, request), fields(name = %request.name, recipients = request.recipients.len()))]
    pub async fn create(&self, request: CreateBatchRequest) -> Result<NotificationBatch> {
        let batch = self.persist(&request).await?;

        let processor = Arc::clone(&self.processor);
        let batch_id = batch.id;
        tokio::spawn(async move {
            if let Err(e) = processor.process(batch_id, request).await {
                error!(batch_id = %batch_id, error = %e, "批量任务处理失败");
            }
        });

        Ok(batch)
    }

    /// 创建批次并等待处理完成
    #[instrument(skip(self, request), fields(name = %request.name, recipients = request.recipients.len()))]
    pub async fn create_and_process(&self, request: CreateBatchRequest) -> Result<NotificationBatch> {
        let batch = self.persist(&request).await?;
        self.processor.process(batch.id, request).await
    }

    pub async fn get(&self, id: Uuid) -> Result<NotificationBatch> {
        self.batches
            .get(id)
            .await?
            .ok_or(NotificationError::BatchNotFound(id))
    }

    async fn persist(&self, request: &CreateBatchRequest) -> Result<NotificationBatch> {
        request.check()?;

        let now = Utc::now();
        let batch = NotificationBatch {
            id: Uuid::now_v7(),
            name: request.name.clone(),
            description: request.description.clone(),
            template_id: request.template_id,
            template_variables: request.template_variables.clone(),
            notification_type: request.notification_type.unwrap_or_default(),
            category: request.category.unwrap_or_default(),
            priority: request.priority.unwrap_or_default(),
            channels: request.channels.clone().unwrap_or_default(),
            recipients: request.recipients.clone(),
            status: BatchStatus::Pending,
            total_count: request.recipients.len() as i32,
            success_count: 0,
            failure_count: 0,
            started_at: None,
            completed_at: None,
            created_by: request.created_by.clone(),
            created_at: now,
            updated_at: now,
        };

        self.batches.create(&batch).await?;
        info!(batch_id = %batch.id, total = batch.total_count, "批量任务已创建");
        Ok(batch)
    }
}
