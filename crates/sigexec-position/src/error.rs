//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Not enough candles: need {needed}, got {got}")]
    InsufficientCandles { needed: usize, got: usize },

    #[error("Unknown position side for {symbol}")]
    UnknownSide { symbol: String },

    #[error("Invalid position state: {0}")]
    InvalidState(String),
}

pub type PositionResult<T> = Result<T, PositionError>;
