use thiserror::Error;

use crate::models::{MigrationStatus, MigrationType};

/// 迁移引擎错误类型定义
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("迁移记录未找到: {run_id}")]
    RunNotFound { run_id: String },

    #[error("迁移类型未配置: {0}")]
    MigrationTypeNotConfigured(MigrationType),

    #[error("迁移类型 {migration_type} 已有进行中的迁移: {run_id}")]
    MigrationInProgress {
        migration_type: MigrationType,
        run_id: String,
    },

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition {
        from: MigrationStatus,
        to: MigrationStatus,
    },

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("上游服务错误 ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("映射服务错误: {0}")]
    Mapping(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn run_not_found<S: Into<String>>(run_id: S) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }

    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn queue_error<S: Into<String>>(msg: S) -> Self {
        Self::MessageQueue(msg.into())
    }

    /// 可由传输层重投递解决的瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::DatabaseOperation(_)
            | MigrationError::MessageQueue(_)
            | MigrationError::Network(_)
            | MigrationError::Mapping(_)
            | MigrationError::Timeout(_) => true,
            MigrationError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 启动前即可判定的请求错误，不会进入队列
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MigrationError::ValidationError(_)
                | MigrationError::MigrationTypeNotConfigured(_)
                | MigrationError::MigrationInProgress { .. }
                | MigrationError::InvalidStateTransition { .. }
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            MigrationError::RunNotFound { .. } => "请求的迁移记录不存在",
            MigrationError::MigrationTypeNotConfigured(_) => "该迁移类型尚未配置",
            MigrationError::MigrationInProgress { .. } => "该迁移类型已有进行中的迁移",
            MigrationError::InvalidStateTransition { .. } => "迁移当前状态不允许该操作",
            MigrationError::ValidationError(_) => "输入数据验证失败",
            MigrationError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MigrationError {
    fn from(err: anyhow::Error) -> Self {
        MigrationError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MigrationError::run_not_found("2020-03-24T12:00:00");
        assert_eq!(error.to_string(), "迁移记录未找到: 2020-03-24T12:00:00");

        let error = MigrationError::InvalidStateTransition {
            from: MigrationStatus::Completed,
            to: MigrationStatus::CancelledRequested,
        };
        assert_eq!(
            error.to_string(),
            "无效的状态转换: COMPLETED -> CANCELLED_REQUESTED"
        );

        let error = MigrationError::MigrationTypeNotConfigured(MigrationType::Visits);
        assert_eq!(error.to_string(), "迁移类型未配置: VISITS");
    }

    #[test]
    fn test_is_retryable() {
        assert!(MigrationError::Network("connection reset".to_string()).is_retryable());
        assert!(MigrationError::Mapping("503".to_string()).is_retryable());
        assert!(MigrationError::Upstream {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_retryable());
        assert!(!MigrationError::Upstream {
            status: 400,
            message: "bad request".to_string()
        }
        .is_retryable());
        assert!(!MigrationError::validation_error("bad filter").is_retryable());
    }

    #[test]
    fn test_rejections_and_user_messages() {
        let error = MigrationError::MigrationInProgress {
            migration_type: MigrationType::Appointments,
            run_id: "2020-03-24T12:00:00".to_string(),
        };
        assert!(error.is_rejection());
        assert_eq!(error.user_message(), "该迁移类型已有进行中的迁移");
        assert!(!MigrationError::Internal("boom".to_string()).is_rejection());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: MigrationError = err.into();
        assert!(matches!(converted, MigrationError::Serialization(_)));
    }
}
