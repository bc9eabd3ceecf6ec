//! 通知引擎错误类型
//!
//! 定义服务层的业务错误和系统错误。
//!
//! 业务错误按调用方的处理方式分组：
//! - 校验类（`Validation`、`TemplateVariable`、`Suppressed`、`InvalidTransition`）
//! - 定位类（`NotFound`）
//! - 权限类（`Forbidden`）
//! - 投递类（`Transport`）
//!
//! `Suppressed` 虽属校验类，但错误码与其他校验错误不同，调用方（如"提交反馈"流程）
//! 据此判断是用户主动静默，还是请求本身有问题。

use thiserror::Error;

use crate::models::{Channel, NotificationStatus, NotificationType};

/// 通知引擎错误类型
#[derive(Debug, Error)]
pub enum NotificationError {
    // === 校验类错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("模板变量未声明: {}", undeclared.join(", "))]
    TemplateVariable { undeclared: Vec<String> },

    #[error(
        "通知已被用户偏好抑制: user_id={user_id}, type={notification_type}, channel={channel}, reason={reason}"
    )]
    Suppressed {
        user_id: String,
        notification_type: NotificationType,
        channel: Channel,
        reason: String,
    },

    #[error("通知状态不允许此操作: id={id}, from={from}, to={to}")]
    InvalidTransition {
        id: String,
        from: NotificationStatus,
        to: NotificationStatus,
    },

    // === 定位与权限 ===
    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("无权执行操作: {operation}")]
    Forbidden { operation: String },

    // === 投递 ===
    #[error("渠道投递失败: channel={channel}, reason={reason}")]
    Transport { channel: Channel, reason: String },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 通知引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(operation: impl Into<String>) -> Self {
        Self::Forbidden {
            operation: operation.into(),
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Transport { .. })
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_)
        )
    }

    /// 是否属于校验类错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::TemplateVariable { .. }
                | Self::Suppressed { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// 是否为偏好抑制
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TemplateVariable { .. } => "TEMPLATE_VARIABLE_MISMATCH",
            Self::Suppressed { .. } => "NOTIFICATION_SUPPRESSED",
            Self::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for NotificationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<feedback_shared::error::SharedError> for NotificationError {
    fn from(err: feedback_shared::error::SharedError) -> Self {
        use feedback_shared::error::SharedError;
        match err {
            SharedError::Database(e) => Self::Database(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
