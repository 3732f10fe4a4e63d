//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务错误由各服务自行定义。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum NotifyError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::ExternalServiceTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = NotifyError::ExternalService {
            service: "smtp".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
        assert!(err.to_string().contains("smtp"));
    }

    #[test]
    fn test_is_retryable() {
        let db_err = NotifyError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let internal = NotifyError::Internal("boom".to_string());
        assert!(!internal.is_retryable());
    }
}
