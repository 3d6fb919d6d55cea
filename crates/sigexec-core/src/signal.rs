//! Trading signals produced by the external signal generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::market::normalize_symbol;
use crate::{OrderSide, PositionSide, Price};

/// Action requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn order_side(&self) -> OrderSide {
        match self {
            Self::Buy => OrderSide::Buy,
            Self::Sell => OrderSide::Sell,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Immutable trade decision read by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: String,
    pub symbol: String,
    pub action: SignalAction,
    #[serde(with = "position_label")]
    pub position_label: PositionSide,
    #[serde(default)]
    pub price: Option<Price>,
    pub exchange_name: String,
    pub created_at: DateTime<Utc>,
}

impl TradingSignal {
    /// Order side and position side of the entry this signal asks for.
    ///
    /// A buy must target a long and a sell a short; anything else is a
    /// closing instruction this controller does not execute as an entry.
    pub fn entry_sides(&self) -> Result<(OrderSide, PositionSide)> {
        match (self.action, self.position_label) {
            (SignalAction::Buy, PositionSide::Long) => Ok((OrderSide::Buy, PositionSide::Long)),
            (SignalAction::Sell, PositionSide::Short) => {
                Ok((OrderSide::Sell, PositionSide::Short))
            }
            (action, label) => Err(CoreError::InvalidSignal(format!(
                "signal {} pairs action {action} with position {label}",
                self.id
            ))),
        }
    }

    /// Exchange symbol for this signal.
    pub fn exchange_symbol(&self) -> String {
        normalize_symbol(&self.symbol)
    }
}

/// Signals label positions in lowercase (`long`/`short`).
mod position_label {
    use super::PositionSide;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(side: &PositionSide, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(side.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PositionSide, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.to_ascii_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(serde::de::Error::custom(format!(
                "unknown position label: {other}"
            ))),
        }
    }
}
