//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid sizing input: {0}")]
    InvalidInput(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
