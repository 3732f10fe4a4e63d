//! 通知服务错误类型
//!
//! 定义服务层的业务错误和系统错误。
//! 渠道投递失败不走这里：它们被记录在投递记录上，从不抛给创建方。

use thiserror::Error;
use uuid::Uuid;

use crate::models::BatchStatus;

/// 通知服务错误类型
#[derive(Debug, Error)]
pub enum NotificationError {
    // === 通知相关错误 ===
    #[error("通知不存在: {0}")]
    NotificationNotFound(Uuid),

    // === 模板相关错误 ===
    #[error("模板不存在: {0}")]
    TemplateNotFound(Uuid),

    #[error("模板已停用: {0}")]
    TemplateInactive(Uuid),

    #[error("模板名称已存在: {0}")]
    TemplateNameTaken(String),

    // === 定时与批量相关错误 ===
    #[error("定时通知不存在: {0}")]
    ScheduleNotFound(Uuid),

    #[error("批量任务不存在: {0}")]
    BatchNotFound(Uuid),

    #[error("批量任务状态不允许此操作: batch_id={batch_id}, {from:?} -> {to:?}")]
    InvalidBatchTransition {
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    },

    // === 推送订阅相关错误 ===
    #[error("推送订阅不存在: {0}")]
    SubscriptionNotFound(Uuid),

    // === 认证错误 ===
    #[error("未授权: {0}")]
    Unauthorized(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),
}

/// 通知服务 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl From<validator::ValidationErrors> for NotificationError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl NotificationError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_)
        )
    }

    /// 是否应当以 404 语义返回给调用方
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotificationNotFound(_)
                | Self::TemplateNotFound(_)
                | Self::ScheduleNotFound(_)
                | Self::BatchNotFound(_)
                | Self::SubscriptionNotFound(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::TemplateInactive(_) => "TEMPLATE_INACTIVE",
            Self::TemplateNameTaken(_) => "TEMPLATE_NAME_TAKEN",
            Self::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND",
            Self::BatchNotFound(_) => "BATCH_NOT_FOUND",
            Self::InvalidBatchTransition { .. } => "INVALID_BATCH_TRANSITION",
            Self::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(NotificationError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!NotificationError::NotificationNotFound(Uuid::nil()).is_retryable());
        assert!(!NotificationError::Validation("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(NotificationError::TemplateNotFound(Uuid::nil()).is_business_error());
        assert!(NotificationError::Unauthorized("missing token".to_string()).is_business_error());
        assert!(!NotificationError::Internal("panic".to_string()).is_business_error());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(NotificationError::BatchNotFound(Uuid::nil()).is_not_found());
        assert!(!NotificationError::TemplateInactive(Uuid::nil()).is_not_found());
    }

    #[test]
    fn test_error_code_and_display() {
        let err = NotificationError::InvalidBatchTransition {
            batch_id: Uuid::nil(),
            from: BatchStatus::Completed,
            to: BatchStatus::Processing,
        };
        assert_eq!(err.error_code(), "INVALID_BATCH_TRANSITION");
        assert!(err.to_string().contains("Completed"));
    }
}
