//! 批量通知处理器
//!
//! 状态流转：pending -> processing -> completed，
//! 准备阶段失败（如模板不存在或已停用）时 pending -> failed。
//!
//! 收件人按 `concurrency` 分片，分片内并发创建、分片之间顺序执行；
//! 单个收件人失败只计入 failure_count，不中断整个批次。

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use notify_shared::observability::metrics as app_metrics;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{BatchProgress, BatchStatus, NotificationBatch};
use crate::repository::{BatchRepositoryTrait, TemplateRepositoryTrait};
use crate::service::NotificationService;
use crate::service::dto::CreateBatchRequest;

pub struct BatchProcessor {
    batches: Arc<dyn BatchRepositoryTrait>,
    templates: Arc<dyn TemplateRepositoryTrait>,
    notifications: Arc<NotificationService>,
    chunk_size: usize,
}

impl BatchProcessor {
    pub fn new(
        batches: Arc<dyn BatchRepositoryTrait>,
        templates: Arc<dyn TemplateRepositoryTrait>,
        notifications: Arc<NotificationService>,
        concurrency: usize,
    ) -> Self {
        Self {
            batches,
            templates,
            notifications,
            chunk_size: concurrency.max(1),
        }
    }

    /// 处理一个已创建（pending）的批次，返回终态
    #[instrument(skip(self, job), fields(recipients = job.recipients.len()))]
    pub async fn process(&self, batch_id: Uuid, job: CreateBatchRequest) -> Result<NotificationBatch> {
        if let Err(e) = self.prepare(&job).await {
            warn!(batch_id = %batch_id, error = %e, "批量任务准备失败");
            return self
                .batches
                .transition(
                    batch_id,
                    &BatchProgress::finished(BatchStatus::Failed, 0, 0, Utc::now()),
                )
                .await;
        }

        self.batches
            .transition(batch_id, &BatchProgress::processing(Utc::now()))
            .await?;
        info!(batch_id = %batch_id, "批量任务开始处理");

        let (success_count, failure_count) = self.process_in_chunks(batch_id, &job).await;

        let batch = self
            .batches
            .transition(
                batch_id,
                &BatchProgress::finished(
                    BatchStatus::Completed,
                    success_count,
                    failure_count,
                    Utc::now(),
                ),
            )
            .await?;
        app_metrics::record_batch_result(success_count as u64, failure_count as u64);

        info!(
            batch_id = %batch_id,
            total = batch.total_count,
            success_count,
            failure_count,
            "批量任务处理完成"
        );
        Ok(batch)
    }

    async fn prepare(&self, job: &CreateBatchRequest) -> Result<()> {
        if let Some(template_id) = job.template_id {
            let template = self
                .templates
                .get(template_id)
                .await?
                .ok_or(NotificationError::TemplateNotFound(template_id))?;
            if !template.is_active {
                return Err(NotificationError::TemplateInactive(template_id));
            }
        }
        Ok(())
    }

    /// 分片并发处理收件人
    async fn process_in_chunks(&self, batch_id: Uuid, job: &CreateBatchRequest) -> (i32, i32) {
        let mut success_count: i32 = 0;
        let mut failure_count: i32 = 0;

        for (chunk_idx, chunk) in job.recipients.chunks(self.chunk_size).enumerate() {
            let handles = chunk.iter().map(|user_id| async move {
                let result = self
                    .notifications
                    .create_for_batch(job.request_for(user_id), batch_id)
                    .await;
                (user_id, result)
            });

            for (user_id, result) in join_all(handles).await {
                match result {
                    Ok(_) => success_count += 1,
                    Err(e) => {
                        failure_count += 1;
                        error!(
                            batch_id = %batch_id,
                            user_id = %user_id,
                            error = %e,
                            "批量通知创建失败"
                        );
                    }
                }
            }

            info!(
                batch_id = %batch_id,
                chunk = chunk_idx + 1,
                success_count,
                failure_count,
                "批量任务分片处理完成"
            );
        }

        (success_count, failure_count)
    }
}
