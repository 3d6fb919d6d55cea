//! Gateway error types.

use thiserror::Error;

/// Bybit `retCode` for request rate limiting.
pub const RATE_LIMIT_CODE: i64 = 10006;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Exchange rejected request: code={code} message={message}")]
    Rejected { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("News source error: {0}")]
    Source(String),
}

impl GatewayError {
    /// Transient failures worth another attempt: 429/408/5xx, transport,
    /// timeouts and exchange-side rate limiting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Rejected { code, .. } => *code == RATE_LIMIT_CODE,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Transport("reset".to_string()).is_retryable());
        assert!(GatewayError::Timeout.is_retryable());
        for status in [408, 429, 500, 502, 503] {
            assert!(GatewayError::Http {
                status,
                body: String::new()
            }
            .is_retryable());
        }
        for status in [400, 401, 403, 404] {
            assert!(!GatewayError::Http {
                status,
                body: String::new()
            }
            .is_retryable());
        }
        assert!(GatewayError::Rejected {
            code: RATE_LIMIT_CODE,
            message: "Too many visits".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::Rejected {
            code: 110007,
            message: "insufficient balance".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::Decode("eof".to_string()).is_retryable());
    }
}
