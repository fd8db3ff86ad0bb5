use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
///
/// 网关是唯一的错误翻译边界：所有下层失败（校验、超时、后端、传输、存储）
/// 在返回浏览器前都收敛为同一个 `ApiError` 响应形状。
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RegError {
    // === 业务错误 ===
    #[error("校验失败: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    #[error("请求体过大: 超过 {limit_bytes} 字节")]
    PayloadTooLarge { limit_bytes: u64 },

    // === 技术错误 ===
    #[error("超时错误: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("后端错误 ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("后端不可达: {operation}")]
    Transport { operation: String, message: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },

    #[error("本地存储错误: {operation}")]
    Storage { operation: String, message: String },

    // 流式通道内部错误，按设计不向调用方抛出，仅用于日志
    #[error("流式通道错误: {message}")]
    Channel { message: String },

    #[error("内部系统错误: {message}")]
    Internal { message: String },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

impl RegError {
    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RegError::Validation { .. }
            | RegError::NotFound { .. }
            | RegError::PayloadTooLarge { .. } => ErrorSeverity::Low,
            RegError::Timeout { .. }
            | RegError::Backend { .. }
            | RegError::Transport { .. }
            | RegError::Channel { .. } => ErrorSeverity::Medium,
            RegError::Serialization { .. } | RegError::Storage { .. } => ErrorSeverity::High,
            RegError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// 是否为可重试错误
    ///
    /// 超时与传输失败属于瞬态错误；后端错误仅在网关类状态码（502/503/504）下
    /// 视为可重试。生成类操作即使可重试也不在网关内部重试，策略留给调用方。
    pub fn is_retryable(&self) -> bool {
        match self {
            RegError::Timeout { .. } | RegError::Transport { .. } => true,
            RegError::Backend { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }

    /// 获取建议的重试延迟时间
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            RegError::Transport { .. } => Some(std::time::Duration::from_millis(500)),
            RegError::Timeout { .. } => Some(std::time::Duration::from_millis(1000)),
            RegError::Backend { status, .. } if matches!(status, 502 | 503 | 504) => {
                Some(std::time::Duration::from_millis(1000))
            }
            _ => None,
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            RegError::Validation { .. } => 400,
            RegError::NotFound { .. } => 404,
            RegError::PayloadTooLarge { .. } => 413,
            RegError::Timeout { .. } => 408,
            RegError::Backend { status, .. } => *status,
            RegError::Transport { .. } => 503,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    ///
    /// 后端错误原样保留后端提供的消息，其余类别给统一文案。
    pub fn user_message(&self) -> String {
        match self {
            RegError::Validation { reason, .. } => reason.clone(),
            RegError::NotFound { .. } => "请求的资源不存在".to_string(),
            RegError::PayloadTooLarge { limit_bytes } => {
                format!("文件超过大小限制（{} MB）", limit_bytes / (1024 * 1024))
            }
            RegError::Timeout { .. } => "请求超时，请重试".to_string(),
            RegError::Backend { message, .. } if !message.is_empty() => message.clone(),
            RegError::Transport { .. } => "服务暂时不可用，请稍后重试".to_string(),
            _ => "系统内部错误，请稍后重试".to_string(),
        }
    }

    /// 错误短码，写入 ApiError.error 字段
    pub fn code(&self) -> &'static str {
        match self {
            RegError::Validation { .. } => "validation_error",
            RegError::NotFound { .. } => "not_found",
            RegError::PayloadTooLarge { .. } => "payload_too_large",
            RegError::Timeout { .. } => "request_timeout",
            RegError::Backend { .. } => "backend_error",
            RegError::Transport { .. } => "service_unavailable",
            RegError::Serialization { .. } => "serialization_error",
            RegError::Storage { .. } => "storage_error",
            RegError::Channel { .. } => "channel_error",
            RegError::Internal { .. } => "internal_error",
        }
    }

    /// 记录错误日志（按严重级别选择 warn / error）
    pub fn log(&self, component: &str) {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::Medium => {
                warn!(component, error = %self, "操作失败");
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(component, error = %self, severity = ?self.severity(), "严重错误");
            }
        }
    }
}

/// 网关对浏览器的统一错误响应形状
///
/// 无论底层失败来自校验、超时、后端还是传输层，浏览器侧只会见到这一种结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn from_error(err: &RegError) -> Self {
        let details = match err {
            RegError::Validation { field, .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            RegError::Timeout { timeout_ms, .. } => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            _ => None,
        };
        Self {
            error: err.code().to_string(),
            message: err.user_message(),
            status_code: err.to_http_status(),
            details,
        }
    }

    /// 从网关响应体还原为 RegError（浏览器侧客户端使用）
    pub fn into_error(self) -> RegError {
        match self.status_code {
            400 => RegError::Validation {
                field: self
                    .details
                    .as_ref()
                    .and_then(|d| d.get("field"))
                    .and_then(|f| f.as_str())
                    .unwrap_or("request")
                    .to_string(),
                reason: self.message,
            },
            404 => RegError::NotFound {
                resource: self.message,
            },
            408 => RegError::Timeout {
                operation: self.error,
                timeout_ms: self
                    .details
                    .as_ref()
                    .and_then(|d| d.get("timeoutMs"))
                    .and_then(|t| t.as_u64())
                    .unwrap_or(0),
            },
            413 => RegError::PayloadTooLarge { limit_bytes: 0 },
            503 => RegError::Transport {
                operation: self.error,
                message: self.message,
            },
            status => RegError::Backend {
                status,
                message: self.message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RegError>;

// === 转换实现 ===

impl From<serde_json::Error> for RegError {
    fn from(err: serde_json::Error) -> Self {
        RegError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for RegError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 0,
            }
        } else if err.is_connect() {
            RegError::Transport {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            RegError::Transport {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<sled::Error> for RegError {
    fn from(err: sled::Error) -> Self {
        RegError::Storage {
            operation: "sled".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for RegError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegError::Internal {
            message: format!("task join: {err}"),
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for RegError {
    fn into_response(self) -> axum::response::Response {
        let body = ApiError::from_error(&self);
        let status =
            StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let e = RegError::Validation {
            field: "text".into(),
            reason: "too long".into(),
        };
        assert_eq!(e.to_http_status(), 400);
        assert_eq!(
            RegError::PayloadTooLarge {
                limit_bytes: 50 * 1024 * 1024
            }
            .to_http_status(),
            413
        );
        assert_eq!(
            RegError::Timeout {
                operation: "query".into(),
                timeout_ms: 60_000
            }
            .to_http_status(),
            408
        );
        assert_eq!(
            RegError::Backend {
                status: 502,
                message: "bad gateway".into()
            }
            .to_http_status(),
            502
        );
    }

    #[test]
    fn test_retryable_classes() {
        assert!(RegError::Transport {
            operation: "connect".into(),
            message: "refused".into()
        }
        .is_retryable());
        assert!(RegError::Timeout {
            operation: "query".into(),
            timeout_ms: 100
        }
        .is_retryable());
        assert!(RegError::Backend {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!RegError::Backend {
            status: 422,
            message: String::new()
        }
        .is_retryable());
        assert!(!RegError::Validation {
            field: "text".into(),
            reason: "empty".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_api_error_round_trip() {
        let original = RegError::Backend {
            status: 422,
            message: "sector is not supported".into(),
        };
        let wire = ApiError::from_error(&original);
        assert_eq!(wire.status_code, 422);
        // 后端消息原样保留
        assert_eq!(wire.message, "sector is not supported");
        match wire.into_error() {
            RegError::Backend { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "sector is not supported");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validation_details_carry_field() {
        let e = RegError::Validation {
            field: "pageSize".into(),
            reason: "必须在 1..=100 之间".into(),
        };
        let wire = ApiError::from_error(&e);
        assert_eq!(
            wire.details.as_ref().unwrap().get("field").unwrap(),
            "pageSize"
        );
        match wire.into_error() {
            RegError::Validation { field, .. } => assert_eq!(field, "pageSize"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
