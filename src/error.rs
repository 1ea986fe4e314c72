//! 统一错误模型
//! 定义任务平台的错误分类与统一错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown task type: {0}")]
    TaskTypeInvalid(String),

    #[error("Task type disabled: {0}")]
    TaskTypeDisabled(String),

    #[error("Outside of allowed time slots: {0}")]
    TimeSlotLimit(String),

    #[error("Insufficient balance: required {required}, balance {balance}")]
    InsufficientBalance { required: i64, balance: i64 },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_)
            | AppError::Validation(_)
            | AppError::TaskTypeInvalid(_)
            | AppError::TaskTypeDisabled(_)
            | AppError::TimeSlotLimit(_)
            | AppError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            AppError::PreconditionFailed(_) => StatusCode::CONFLICT,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::BadRequest(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::TaskTypeInvalid(code) => format!("任务类型不存在: {}", code),
            AppError::TaskTypeDisabled(code) => format!("该任务类型已被禁用: {}", code),
            AppError::TimeSlotLimit(slots) => {
                format!("创建失败：该任务类型仅在 {} 时段内允许创建任务", slots)
            }
            AppError::InsufficientBalance { required, balance } => format!(
                "京豆余额不足：需要 {} 京豆，当前余额为 {} 京豆",
                required, balance
            ),
            AppError::PreconditionFailed(msg) => msg.clone(),
            AppError::RateLimitExceeded => "Rate limit exceeded".to_string(),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn precondition(msg: &str) -> Self {
        AppError::PreconditionFailed(msg.to_string())
    }

    pub fn database(msg: &str) -> Self {
        AppError::Internal(format!("Database error: {}", msg))
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

/// 错误响应 DTO，与成功响应共用 {code, msg, data} 外形
#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub msg: String,
    pub data: Option<()>,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            code: self.code(),
            msg: self.user_message(),
            data: None,
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.request_id,
                "Application error"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                message = %self,
                request_id = %error_response.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 请求校验失败时取第一个字段的提示信息
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let message = fields
            .into_iter()
            .find_map(|(field, errs)| {
                errs.first().map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field))
                })
            })
            .unwrap_or_else(|| "invalid request".to_string());

        AppError::Validation(message)
    }
}
