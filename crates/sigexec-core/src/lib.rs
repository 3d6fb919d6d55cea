//! Core domain types for the signal execution controller.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `TradingSignal`: The persisted trade decision a tick executes
//! - `Order`, `OrderStatus`, `OrderDirection`: The audited order row and its lifecycle
//! - `Position`, `Candle`: Exchange-side views used for verification and trailing
//! - `NewsEvent`: Macro calendar entries consulted by the news gate
//! - `normalize_symbol`: Signal symbol to exchange symbol mapping

pub mod clock;
pub mod decimal;
pub mod error;
pub mod future;
pub mod market;
pub mod news;
pub mod order;
pub mod signal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{percent_of_float, Price, Size};
pub use error::{CoreError, Result};
pub use future::BoxFuture;
pub use market::{normalize_symbol, Candle, Position};
pub use news::{NewsEvent, HIGH_IMPORTANCE};
pub use order::{
    NewOrder, Order, OrderDirection, OrderId, OrderSide, OrderStatus, OrderType, PositionSide,
};
pub use signal::{SignalAction, TradingSignal};
