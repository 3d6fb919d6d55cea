//! Order store contract.
//!
//! The store is the only mutation path for order rows. Every status write
//! goes through [`OrderStore::update_status`], which enforces the monotonic
//! lifecycle (`pending -> filled | error | canceled_error`).

use std::sync::Arc;

use sigexec_core::{BoxFuture, NewOrder, Order, OrderDirection, OrderId, OrderStatus, Price, TradingSignal};

use crate::error::StoreResult;

/// One status transition with its audit payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub reason: Option<String>,
    /// Raw exchange payload kept with the row.
    pub exchange_response: Option<serde_json::Value>,
}

impl StatusChange {
    pub fn filled(exchange_response: Option<serde_json::Value>) -> Self {
        Self {
            status: OrderStatus::Filled,
            reason: None,
            exchange_response,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Error,
            reason: Some(reason.into()),
            exchange_response: None,
        }
    }

    pub fn canceled(reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::CanceledError,
            reason: Some(reason.into()),
            exchange_response: None,
        }
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.exchange_response = Some(response);
        self
    }
}

/// Durable signal feed and order rows.
pub trait OrderStore: Send + Sync {
    /// Newest signals first for `(symbol, exchange_name)`, at most `limit`.
    fn find_latest_signal(
        &self,
        symbol: &str,
        exchange_name: &str,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<TradingSignal>>>;

    /// Row for one idempotency key, if any.
    fn find_order(
        &self,
        user_id: &str,
        external_id: &str,
        order_dir: OrderDirection,
    ) -> BoxFuture<'_, StoreResult<Option<Order>>>;

    /// Insert a `pending` row and assign its id. Fails with
    /// [`StoreError::Duplicate`](crate::StoreError::Duplicate) if the key exists.
    fn create_order(&self, order: NewOrder) -> BoxFuture<'_, StoreResult<Order>>;

    fn update_status(&self, id: OrderId, change: StatusChange) -> BoxFuture<'_, StoreResult<Order>>;

    /// Persist the current protective stop.
    fn update_stop_loss(&self, id: OrderId, stop_price: Price) -> BoxFuture<'_, StoreResult<Order>>;
}

/// Arc wrapper for store trait objects.
pub type DynOrderStore = Arc<dyn OrderStore>;

/// Signals matching `(symbol, exchange_name)`, newest first.
///
/// Ties on `created_at` keep the later-appended signal first.
pub(crate) fn select_signals(
    signals: &[TradingSignal],
    symbol: &str,
    exchange_name: &str,
    limit: usize,
) -> Vec<TradingSignal> {
    let mut matching: Vec<TradingSignal> = signals
        .iter()
        .rev()
        .filter(|s| s.symbol.eq_ignore_ascii_case(symbol))
        .filter(|s| s.exchange_name.eq_ignore_ascii_case(exchange_name))
        .cloned()
        .collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matching.truncate(limit);
    matching
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sigexec_core::{PositionSide, SignalAction};

    fn signal(id: &str, symbol: &str, exchange: &str, minutes: i64) -> TradingSignal {
        TradingSignal {
            id: id.to_string(),
            symbol: symbol.to_string(),
            action: SignalAction::Buy,
            position_label: PositionSide::Long,
            price: None,
            exchange_name: exchange.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_select_signals_newest_first() {
        let signals = vec![
            signal("a", "BTCUSD", "bybit", 0),
            signal("b", "BTCUSD", "bybit", 10),
            signal("c", "ETHUSD", "bybit", 20),
            signal("d", "btcusd", "Bybit", 5),
            signal("e", "BTCUSD", "binance", 30),
        ];
        let selected = select_signals(&signals, "BTCUSD", "bybit", 10);
        let ids: Vec<_> = selected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a"]);

        let latest = select_signals(&signals, "BTCUSD", "bybit", 1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "b");
    }

    #[test]
    fn test_select_signals_tie_prefers_later_append() {
        let signals = vec![
            signal("first", "BTCUSD", "bybit", 0),
            signal("second", "BTCUSD", "bybit", 0),
        ];
        let selected = select_signals(&signals, "BTCUSD", "bybit", 1);
        assert_eq!(selected[0].id, "second");
    }

    #[test]
    fn test_status_change_constructors() {
        let filled = StatusChange::filled(Some(serde_json::json!({"orderId": "1"})));
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(filled.reason.is_none());

        let error = StatusChange::error("verify timed out").with_response(serde_json::json!({}));
        assert_eq!(error.status, OrderStatus::Error);
        assert_eq!(error.reason.as_deref(), Some("verify timed out"));
        assert!(error.exchange_response.is_some());

        assert_eq!(StatusChange::canceled("x").status, OrderStatus::CanceledError);
    }
}
