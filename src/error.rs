use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Rate limit, timeout, connection reset or 5xx. Retried at the client layer.
    #[error("{upstream} transient failure: {message}")]
    Transient { upstream: String, message: String },

    /// Malformed request or rejected input. Never retried.
    #[error("{upstream} rejected request (HTTP {status}): {message}")]
    Permanent {
        upstream: String,
        status: u16,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn transient(upstream: &str, message: impl Into<String>) -> Self {
        AppError::Transient {
            upstream: upstream.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(upstream: &str, status: u16, message: impl Into<String>) -> Self {
        AppError::Permanent {
            upstream: upstream.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Whether the client layer should retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transient { .. } => true,
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Short label used for skip reasons and summary counters.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Transient { .. } | AppError::Http(_) => "transient",
            AppError::Permanent { .. } => "permanent",
            AppError::Json(_) => "decode",
            AppError::Database(_) | AppError::Migration(_) => "storage",
            AppError::Config(_) => "config",
            AppError::NotFound(_) => "not_found",
            AppError::Cancelled => "cancelled",
            AppError::Io(_) => "io",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        assert!(AppError::transient("gamma", "HTTP 503").is_retryable());
        assert!(!AppError::permanent("gamma", 400, "bad offset").is_retryable());
        assert!(!AppError::Config("x".into()).is_retryable());
    }

    #[test]
    fn kinds_are_stable_labels() {
        assert_eq!(AppError::transient("data", "timeout").kind(), "transient");
        assert_eq!(AppError::permanent("data", 404, "gone").kind(), "permanent");
        assert_eq!(AppError::Cancelled.kind(), "cancelled");
    }
}
