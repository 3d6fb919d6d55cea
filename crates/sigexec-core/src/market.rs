//! Exchange-side views: open positions, candles, symbol mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PositionSide, Price, Size};

/// Open position as reported by an exchange gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// `None` when the exchange reported a side this crate does not recognize.
    pub side: Option<PositionSide>,
    pub size: Size,
    pub entry_price: Price,
}

impl Position {
    /// True if this position matches `(symbol, side)` with non-zero size.
    pub fn is_open(&self, symbol: &str, side: PositionSide) -> bool {
        self.symbol == symbol && self.side == Some(side) && self.size.is_positive()
    }
}

/// OHLC bar. Windows are ordered oldest first, most recent last.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Map a signal symbol onto the exchange's USDT-margined contract name.
///
/// `...USD` becomes `...USDT`; every other symbol passes through. The result
/// is always uppercase.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.to_ascii_uppercase();
    if upper.ends_with("USD") {
        format!("{upper}T")
    } else {
        upper
    }
}
