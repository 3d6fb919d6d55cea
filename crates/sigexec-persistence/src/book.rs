//! Indexed order rows shared by the store backends.
//!
//! Mutations are split into `prepare_*` (validate and build the new row)
//! and `put` (commit), so the journal can write its event between the two
//! and leave the book untouched when the write fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sigexec_core::{NewOrder, Order, OrderDirection, OrderId, Price};

use crate::error::{StoreError, StoreResult};
use crate::store::StatusChange;

type OrderKey = (String, String, OrderDirection);

#[derive(Debug, Default)]
pub(crate) struct OrderBook {
    orders: HashMap<OrderId, Order>,
    index: HashMap<OrderKey, OrderId>,
    last_id: u64,
}

impl OrderBook {
    pub(crate) fn find(&self, user_id: &str, external_id: &str, order_dir: OrderDirection) -> Option<&Order> {
        let key = (user_id.to_string(), external_id.to_string(), order_dir);
        self.index.get(&key).and_then(|id| self.orders.get(id))
    }

    pub(crate) fn get(&self, id: OrderId) -> StoreResult<&Order> {
        self.orders.get(&id).ok_or(StoreError::NotFound(id))
    }

    pub(crate) fn prepare_create(&self, new: NewOrder, now: DateTime<Utc>) -> StoreResult<Order> {
        if self.find(&new.user_id, &new.external_id, new.order_dir).is_some() {
            return Err(StoreError::Duplicate {
                user_id: new.user_id,
                external_id: new.external_id,
                order_dir: new.order_dir,
            });
        }
        Ok(Order::from_new(OrderId(self.last_id + 1), new, now))
    }

    pub(crate) fn prepare_status(
        &self,
        id: OrderId,
        change: &StatusChange,
        now: DateTime<Utc>,
    ) -> StoreResult<Order> {
        let current = self.get(id)?;
        if !current.status.can_transition_to(change.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: change.status,
            });
        }
        let mut next = current.clone();
        next.status = change.status;
        next.status_reason = change.reason.clone();
        if change.exchange_response.is_some() {
            next.exchange_response = change.exchange_response.clone();
        }
        next.updated_at = now;
        Ok(next)
    }

    pub(crate) fn prepare_stop(&self, id: OrderId, stop_price: Price, now: DateTime<Utc>) -> StoreResult<Order> {
        let mut next = self.get(id)?.clone();
        next.stop_price = Some(stop_price);
        next.updated_at = now;
        Ok(next)
    }

    /// Insert or replace a row.
    pub(crate) fn put(&mut self, order: Order) {
        self.last_id = self.last_id.max(order.id.0);
        let key = (order.user_id.clone(), order.external_id.clone(), order.order_dir);
        self.index.insert(key, order.id);
        self.orders.insert(order.id, order);
    }

    /// All rows in id order.
    pub(crate) fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub(crate) fn len(&self) -> usize {
        self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sigexec_core::{OrderStatus, OrderType, PositionSide, Size};

    fn new_order(external_id: &str, dir: OrderDirection) -> NewOrder {
        NewOrder {
            user_id: "u1".to_string(),
            exchange_id: "paper".to_string(),
            external_id: external_id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long.entry_side(),
            pos_side: PositionSide::Long,
            order_type: OrderType::Market,
            quantity: Size::new(dec!(0.1)),
            price: None,
            stop_loss_pct: dec!(1),
            order_dir: dir,
        }
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let mut book = OrderBook::default();
        let now = Utc::now();
        let first = book.prepare_create(new_order("s1", OrderDirection::Entry), now).unwrap();
        book.put(first);
        let second = book.prepare_create(new_order("s1", OrderDirection::Exit), now).unwrap();
        assert_eq!(second.id, OrderId(2));
        book.put(second);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut book = OrderBook::default();
        let now = Utc::now();
        let order = book.prepare_create(new_order("s1", OrderDirection::Entry), now).unwrap();
        book.put(order);
        let result = book.prepare_create(new_order("s1", OrderDirection::Entry), now);
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut book = OrderBook::default();
        let now = Utc::now();
        let order = book.prepare_create(new_order("s1", OrderDirection::Entry), now).unwrap();
        let id = order.id;
        book.put(order);

        let filled = book.prepare_status(id, &StatusChange::filled(None), now).unwrap();
        book.put(filled);
        assert_eq!(book.get(id).unwrap().status, OrderStatus::Filled);

        let result = book.prepare_status(id, &StatusChange::error("late"), now);
        assert!(matches!(
            result,
            Err(StoreError::InvalidTransition {
                from: OrderStatus::Filled,
                to: OrderStatus::Error,
                ..
            })
        ));
    }

    #[test]
    fn test_failed_prepare_leaves_row_unchanged() {
        let mut book = OrderBook::default();
        let now = Utc::now();
        let order = book.prepare_create(new_order("s1", OrderDirection::Entry), now).unwrap();
        let id = order.id;
        book.put(order);

        let _ = book.prepare_stop(id, Price::new(dec!(99)), now).unwrap();
        assert!(book.get(id).unwrap().stop_price.is_none());
        assert!(matches!(
            book.prepare_stop(OrderId(42), Price::new(dec!(99)), now),
            Err(StoreError::NotFound(OrderId(42)))
        ));
    }
}
