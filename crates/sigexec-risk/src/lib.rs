//! Session-based position sizing and news-event trade gating.
//!
//! Both engines are pure functions of their inputs (time, config, events):
//! - [`RiskSizer`]: classifies wall-clock time into a [`RiskSession`] on the
//!   New York clock and scales the base quantity by the user's multiplier
//! - [`can_enter_trade_at`]: blocks entries around high-importance macro events

pub mod error;
pub mod news_gate;
pub mod session;
pub mod sizing;

pub use error::{RiskError, RiskResult};
pub use news_gate::{can_enter_trade_at, NewsGateConfig, TradeGateDecision};
pub use session::{RiskSession, SessionSchedule, SessionWindow};
pub use sizing::{base_quantity, RiskSizer, RiskSizingConfig, SessionMultipliers, SizingDecision};
