//! Order rows, sides and the status lifecycle.
//!
//! An `Order` is the durable audit record of one placement attempt. It is
//! keyed for idempotency by `(user_id, external_id, order_dir)` and only ever
//! moves `pending -> filled | error | canceled_error`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::{Price, Size};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Position direction tag, distinct from the order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Side of the order that opens or adds to this position.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the reduce-only order that closes this position.
    pub fn close_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "Market"),
            Self::Limit => write!(f, "Limit"),
        }
    }
}

/// Lifecycle status of an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Row created, exchange outcome not yet confirmed.
    Pending,
    /// Matching position observed on the exchange.
    Filled,
    /// Placement, flatten or verification failed.
    Error,
    /// Aborted before placement because exposure could not be resolved.
    CanceledError,
}

impl OrderStatus {
    /// Returns true if the status can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only `pending` may move, and only to a terminal status.
    #[must_use]
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Filled => "filled",
            Self::Error => "error",
            Self::CanceledError => "canceled_error",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "filled" => Ok(Self::Filled),
            "error" => Ok(Self::Error),
            "canceled_error" => Ok(Self::CanceledError),
            other => Err(CoreError::UnknownValue(other.to_string())),
        }
    }
}

/// Whether an order opens the signal's position or closes stale exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Entry,
    Exit,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Store-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order row contents before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: String,
    pub exchange_id: String,
    /// Signal id for entries; `"{signal}:close-{side}"` for exits.
    pub external_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub pos_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: Size,
    pub price: Option<Price>,
    /// Configured protective stop distance in percent of entry.
    pub stop_loss_pct: Decimal,
    pub order_dir: OrderDirection,
}

impl NewOrder {
    /// External id used for the reduce-only close paired with a signal.
    pub fn exit_external_id(signal_id: &str, closing: PositionSide) -> String {
        format!("{signal_id}:close-{}", closing.as_str())
    }
}

/// Persisted order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub exchange_id: String,
    pub external_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub pos_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: Size,
    pub price: Option<Price>,
    pub stop_loss_pct: Decimal,
    /// Current protective stop; `None` until one has been attached.
    #[serde(default)]
    pub stop_price: Option<Price>,
    pub status: OrderStatus,
    /// Reason recorded with the last status transition.
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Raw exchange payload kept for audit.
    #[serde(default)]
    pub exchange_response: Option<serde_json::Value>,
    pub order_dir: OrderDirection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materialize a freshly created `pending` row.
    pub fn from_new(id: OrderId, new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            exchange_id: new.exchange_id,
            external_id: new.external_id,
            symbol: new.symbol,
            side: new.side,
            pos_side: new.pos_side,
            order_type: new.order_type,
            quantity: new.quantity,
            price: new.price,
            stop_loss_pct: new.stop_loss_pct,
            stop_price: None,
            status: OrderStatus::Pending,
            status_reason: None,
            exchange_response: None,
            order_dir: new.order_dir,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stop derived from the entry price and `stop_loss_pct`.
    ///
    /// Longs sit below entry, shorts above. Returns `None` for a zero
    /// percentage (no protective stop configured).
    pub fn initial_stop(&self, entry: Price) -> Option<Price> {
        if self.stop_loss_pct <= Decimal::ZERO {
            return None;
        }
        Some(match self.pos_side {
            PositionSide::Long => entry.offset_pct(-self.stop_loss_pct),
            PositionSide::Short => entry.offset_pct(self.stop_loss_pct),
        })
    }

    /// The stop the trail engine should tighten from.
    pub fn current_stop(&self) -> Option<Price> {
        self.stop_price
            .or_else(|| self.price.and_then(|p| self.initial_stop(p)))
    }

    /// Idempotency key of this row.
    pub fn key(&self) -> (&str, &str, OrderDirection) {
        (&self.user_id, &self.external_id, self.order_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_new(pos_side: PositionSide) -> NewOrder {
        NewOrder {
            user_id: "u1".to_string(),
            exchange_id: "paper".to_string(),
            external_id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: pos_side.entry_side(),
            pos_side,
            order_type: OrderType::Market,
            quantity: Size::new(dec!(0.5)),
            price: Some(Price::new(dec!(100))),
            stop_loss_pct: dec!(2),
            order_dir: OrderDirection::Entry,
        }
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Error));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::CanceledError));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Error));
        assert!(!OrderStatus::Error.can_transition_to(OrderStatus::Filled));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Filled,
            OrderStatus::Error,
            OrderStatus::CanceledError,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_position_side_order_sides() {
        assert_eq!(PositionSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.close_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.entry_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.close_side(), OrderSide::Buy);
    }

    #[test]
    fn test_initial_stop_direction() {
        let now = Utc::now();
        let long = Order::from_new(OrderId(1), sample_new(PositionSide::Long), now);
        assert_eq!(
            long.initial_stop(Price::new(dec!(100))),
            Some(Price::new(dec!(98)))
        );

        let short = Order::from_new(OrderId(2), sample_new(PositionSide::Short), now);
        assert_eq!(
            short.initial_stop(Price::new(dec!(100))),
            Some(Price::new(dec!(102)))
        );
    }

    #[test]
    fn test_current_stop_prefers_persisted_price() {
        let mut order = Order::from_new(OrderId(1), sample_new(PositionSide::Long), Utc::now());
        assert_eq!(order.current_stop(), Some(Price::new(dec!(98))));

        order.stop_price = Some(Price::new(dec!(99.5)));
        assert_eq!(order.current_stop(), Some(Price::new(dec!(99.5))));
    }

    #[test]
    fn test_exit_external_id() {
        assert_eq!(
            NewOrder::exit_external_id("sig-9", PositionSide::Short),
            "sig-9:close-short"
        );
    }
}
