use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use migration_core::MigrationError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("迁移错误: {0}")]
    Migration(#[from] MigrationError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Migration(err) => match err {
                MigrationError::RunNotFound { .. } => (StatusCode::NOT_FOUND, "RUN_NOT_FOUND"),
                MigrationError::ValidationError(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                MigrationError::MigrationTypeNotConfigured(_) => {
                    (StatusCode::BAD_REQUEST, "MIGRATION_TYPE_NOT_CONFIGURED")
                }
                MigrationError::MigrationInProgress { .. } => {
                    (StatusCode::CONFLICT, "MIGRATION_IN_PROGRESS")
                }
                MigrationError::InvalidStateTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
                }
                MigrationError::Upstream { .. }
                | MigrationError::Network(_)
                | MigrationError::Mapping(_)
                | MigrationError::Timeout(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }

    fn user_message(&self) -> &str {
        match self {
            ApiError::Migration(err) => err.user_message(),
            ApiError::BadRequest(_) => "请求参数错误",
            ApiError::NotFound(_) => "请求的资源不存在",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "userMessage": self.user_message(),
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
