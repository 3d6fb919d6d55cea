//! Map-backed order store for tests and paper trading.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sigexec_core::{
    BoxFuture, Clock, NewOrder, Order, OrderDirection, OrderId, Price, SystemClock, TradingSignal,
};
use tracing::debug;

use crate::book::OrderBook;
use crate::error::{StoreError, StoreResult};
use crate::store::{select_signals, OrderStore, StatusChange};

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindSignal,
    FindOrder,
    CreateOrder,
    UpdateStatus,
    UpdateStopLoss,
}

#[derive(Default)]
struct MemoryState {
    book: OrderBook,
    signals: Vec<TradingSignal>,
    failures: HashMap<StoreOp, u32>,
}

impl MemoryState {
    fn take_failure(&mut self, op: StoreOp) -> StoreResult<()> {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

/// Order store that lives only as long as the process.
pub struct InMemoryOrderStore {
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Timestamps rows with `clock` instead of the system time.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Append a signal to the feed.
    pub fn push_signal(&self, signal: TradingSignal) {
        debug!(signal_id = %signal.id, symbol = %signal.symbol, "Signal pushed");
        self.state.lock().signals.push(signal);
    }

    /// Fail the next `times` calls of `op` with [`StoreError::Unavailable`].
    pub fn fail_times(&self, op: StoreOp, times: u32) {
        self.state.lock().failures.insert(op, times);
    }

    pub fn fail_next(&self, op: StoreOp) {
        self.fail_times(op, 1);
    }

    /// All rows in id order.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().book.all()
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.state.lock().book.get(id).ok().cloned()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn find_latest_signal(
        &self,
        symbol: &str,
        exchange_name: &str,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<TradingSignal>>> {
        let symbol = symbol.to_string();
        let exchange_name = exchange_name.to_string();
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(StoreOp::FindSignal)?;
            Ok(select_signals(&state.signals, &symbol, &exchange_name, limit))
        })
    }

    fn find_order(
        &self,
        user_id: &str,
        external_id: &str,
        order_dir: OrderDirection,
    ) -> BoxFuture<'_, StoreResult<Option<Order>>> {
        let user_id = user_id.to_string();
        let external_id = external_id.to_string();
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(StoreOp::FindOrder)?;
            Ok(state.book.find(&user_id, &external_id, order_dir).cloned())
        })
    }

    fn create_order(&self, order: NewOrder) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(StoreOp::CreateOrder)?;
            let created = state.book.prepare_create(order, self.clock.now())?;
            state.book.put(created.clone());
            Ok(created)
        })
    }

    fn update_status(&self, id: OrderId, change: StatusChange) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(StoreOp::UpdateStatus)?;
            let updated = state.book.prepare_status(id, &change, self.clock.now())?;
            state.book.put(updated.clone());
            Ok(updated)
        })
    }

    fn update_stop_loss(&self, id: OrderId, stop_price: Price) -> BoxFuture<'_, StoreResult<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(StoreOp::UpdateStopLoss)?;
            let updated = state.book.prepare_stop(id, stop_price, self.clock.now())?;
            state.book.put(updated.clone());
            Ok(updated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sigexec_core::{ManualClock, OrderStatus, OrderType, PositionSide, SignalAction, Size};

    fn new_entry(external_id: &str) -> NewOrder {
        NewOrder {
            user_id: "u1".to_string(),
            exchange_id: "paper".to_string(),
            external_id: external_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Short.entry_side(),
            pos_side: PositionSide::Short,
            order_type: OrderType::Market,
            quantity: Size::new(dec!(0.25)),
            price: Some(Price::new(dec!(60000))),
            stop_loss_pct: dec!(1.5),
            order_dir: OrderDirection::Entry,
        }
    }

    #[tokio::test]
    async fn test_pending_to_filled_round_trip() {
        let store = InMemoryOrderStore::new();
        let created = store.create_order(new_entry("sig-1")).await.unwrap();
        assert_eq!(created.status, OrderStatus::Pending);

        store
            .update_status(created.id, StatusChange::filled(Some(serde_json::json!({"orderId": "x"}))))
            .await
            .unwrap();

        let found = store
            .find_order("u1", "sig-1", OrderDirection::Entry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, OrderStatus::Filled);
        assert_eq!(found.quantity, Size::new(dec!(0.25)));
        assert_eq!(found.symbol, "BTCUSDT");
        assert_eq!(found.pos_side, PositionSide::Short);
        assert!(found.exchange_response.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_entry_rejected() {
        let store = InMemoryOrderStore::new();
        store.create_order(new_entry("sig-1")).await.unwrap();
        let result = store.create_order(new_entry("sig-1")).await;
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_order_is_none() {
        let store = InMemoryOrderStore::new();
        let found = store
            .find_order("u1", "nope", OrderDirection::Entry)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = InMemoryOrderStore::new();
        store.fail_next(StoreOp::FindSignal);
        let first = store.find_latest_signal("BTCUSD", "bybit", 1).await;
        assert!(matches!(first, Err(StoreError::Unavailable(_))));
        let second = store.find_latest_signal("BTCUSD", "bybit", 1).await;
        tokio_test::assert_ok!(second);
    }

    #[tokio::test]
    async fn test_clock_stamps_rows() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryOrderStore::with_clock(clock.clone());
        let created = store.create_order(new_entry("sig-1")).await.unwrap();
        assert_eq!(created.created_at, start);

        clock.advance(chrono::Duration::minutes(3));
        let moved = store
            .update_stop_loss(created.id, Price::new(dec!(60500)))
            .await
            .unwrap();
        assert_eq!(moved.stop_price, Some(Price::new(dec!(60500))));
        assert_eq!(moved.created_at, start);
        assert_eq!(moved.updated_at, start + chrono::Duration::minutes(3));
    }

    #[tokio::test]
    async fn test_push_signal_feeds_latest() {
        let store = InMemoryOrderStore::new();
        store.push_signal(TradingSignal {
            id: "sig-7".to_string(),
            symbol: "ETHUSD".to_string(),
            action: SignalAction::Sell,
            position_label: PositionSide::Short,
            price: None,
            exchange_name: "bybit".to_string(),
            created_at: Utc::now(),
        });
        let signals = store.find_latest_signal("ETHUSD", "bybit", 1).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "sig-7");
    }
}
