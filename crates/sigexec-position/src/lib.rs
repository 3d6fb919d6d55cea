//! Position management for the signal execution controller.
//!
//! # Key Components
//!
//! - [`next_stop`]: Directional trailing stop computation over a candle window
//! - [`StopUpdate`]: Result of one trailing step
//! - [`plan_flatten`]: Turns open positions into reduce-only close requests
//! - [`FlattenRequest`]: One reduce-only close, paired with an exit order row

pub mod error;
pub mod flatten;
pub mod trail;

pub use error::{PositionError, PositionResult};
pub use flatten::{plan_flatten, FlattenReason, FlattenRequest};
pub use trail::{next_stop, StopUpdate, DEFAULT_LOOKBACK};
