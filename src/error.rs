use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::types::{ProviderErrorKind, Sport};

#[derive(Debug, Error)]
pub enum AppError {
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

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            AppError::Eval(e) => return e.into_response(),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

// ---------------------------------------------------------------------------
// Provider errors: recorded per step, never returned past the orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("rate limited by upstream (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String, transient: bool },

    #[error("provider unavailable: {detail}")]
    Unavailable { detail: String, transient: bool },
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } => ProviderErrorKind::Timeout,
            ProviderError::RateLimited { .. } => ProviderErrorKind::RateLimited,
            ProviderError::AuthFailed(_) => ProviderErrorKind::AuthFailed,
            ProviderError::SchemaMismatch { .. } => ProviderErrorKind::SchemaMismatch,
            ProviderError::Unavailable { .. } => ProviderErrorKind::Unavailable,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::AuthFailed(_) => false,
            ProviderError::SchemaMismatch { transient, .. }
            | ProviderError::Unavailable { transient, .. } => *transient,
        }
    }

    /// Structurally wrong payload: retrying returns the same shape.
    pub fn schema(detail: impl Into<String>) -> Self {
        ProviderError::SchemaMismatch { detail: detail.into(), transient: false }
    }

    pub fn from_status(status: u16, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::AuthFailed(format!("HTTP {status}")),
            408 => ProviderError::Timeout { after_ms: 0 },
            429 => ProviderError::RateLimited { retry_after_secs },
            500..=599 => ProviderError::Unavailable {
                detail: format!("HTTP {status}"),
                transient: true,
            },
            _ => ProviderError::Unavailable {
                detail: format!("HTTP {status}"),
                transient: false,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout { after_ms: 0 };
        }
        if let Some(status) = e.status() {
            return ProviderError::from_status(status.as_u16(), None);
        }
        if e.is_decode() || e.is_body() {
            return ProviderError::SchemaMismatch { detail: e.to_string(), transient: true };
        }
        ProviderError::Unavailable { detail: e.to_string(), transient: true }
    }
}

impl From<serde_json::Error> for ProviderError {
    /// Truncated or non-JSON bodies are worth another attempt; valid JSON of the
    /// wrong shape is not.
    fn from(e: serde_json::Error) -> Self {
        let transient = e.is_eof() || e.is_syntax();
        ProviderError::SchemaMismatch { detail: e.to_string(), transient }
    }
}

// ---------------------------------------------------------------------------
// Pricing / evaluation errors: surfaced to callers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PricingError {
    #[error("invalid American price {0}")]
    InvalidPrice(f64),

    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),
}

impl IntoResponse for EvalError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            EvalError::Pricing(_) => StatusCode::BAD_REQUEST,
            EvalError::MetricsUnavailable(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A trigger that arrived while a cycle for the same sport was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("collection for {sport} already running; trigger coalesced")]
pub struct CycleCoalesced {
    pub sport: Sport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProviderError::from_status(401, None).kind(), ProviderErrorKind::AuthFailed);
        assert_eq!(ProviderError::from_status(429, Some(3)).kind(), ProviderErrorKind::RateLimited);
        assert!(ProviderError::from_status(503, None).is_transient());
        assert!(!ProviderError::from_status(404, None).is_transient());
        assert!(!ProviderError::from_status(403, None).is_transient());
    }

    #[test]
    fn truncated_json_is_transient_but_wrong_shape_is_not() {
        let truncated = serde_json::from_str::<serde_json::Value>("{\"events\": [").unwrap_err();
        assert!(ProviderError::from(truncated).is_transient());

        let wrong_shape = serde_json::from_str::<Vec<u32>>("{\"a\": 1}").unwrap_err();
        let err = ProviderError::from(wrong_shape);
        assert_eq!(err.kind(), ProviderErrorKind::SchemaMismatch);
        assert!(!err.is_transient());
    }
}
