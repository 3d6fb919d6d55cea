//! Controller error types.
//!
//! Variants follow the failure stage of a tick, so a variant alone tells an
//! operator whether exposure may have changed.

use sigexec_persistence::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Signal feed unreachable or query failed. No order was touched.
    #[error("Signal source error: {0}")]
    SignalSource(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Margin/ticker fetch failed or inputs were unusable. No order row exists.
    #[error("Sizing error: {0}")]
    Sizing(String),

    #[error("News source error: {0}")]
    NewsSource(String),

    /// Stale exposure could not be closed; the entry was not placed.
    #[error("Flatten error: {0}")]
    Flatten(String),

    #[error("Placement error: {0}")]
    Placement(String),

    #[error("Verification timed out after {attempts} polls ({purpose})")]
    VerificationTimeout { purpose: &'static str, attempts: u32 },

    /// Position lookup for a pending order failed.
    #[error("Reconcile error: {0}")]
    Reconcile(String),

    #[error("Stop-loss error: {0}")]
    StopLoss(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{op} exceeded call deadline of {timeout_ms}ms")]
    CallTimeout { op: &'static str, timeout_ms: u64 },

    #[error("Tick cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    /// Stable label for metrics and audit records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignalSource(_) => "signal_source",
            Self::InvalidSignal(_) => "invalid_signal",
            Self::Sizing(_) => "sizing",
            Self::NewsSource(_) => "news_source",
            Self::Flatten(_) => "flatten",
            Self::Placement(_) => "placement",
            Self::VerificationTimeout { .. } => "verification_timeout",
            Self::Reconcile(_) => "reconcile",
            Self::StopLoss(_) => "stop_loss",
            Self::Store(_) => "store",
            Self::CallTimeout { .. } => "call_timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
