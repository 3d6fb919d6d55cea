//! Store error types.

use sigexec_core::{OrderDirection, OrderId, OrderStatus};
use thiserror::Error;

/// Order store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order already exists for user={user_id} external_id={external_id} dir={order_dir}")]
    Duplicate {
        user_id: String,
        external_id: String,
        order_dir: OrderDirection,
    },

    #[error("Invalid status transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
