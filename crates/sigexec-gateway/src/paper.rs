//! In-memory simulated exchange account.
//!
//! Market orders fill at the configured ticker. Positions are tracked per
//! `(symbol, side)` like a hedge-mode account. Failures can be injected per
//! operation, and fills can be delayed or suppressed to exercise the
//! controller's verification and flatten-confirmation polls.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use sigexec_core::{Candle, OrderSide, Position, PositionSide, Price, Size};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, ExchangeGateway, OrderAck, OrderRequest, StopLossRequest};

/// Gateway operation, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    Margin,
    Ticker,
    Positions,
    PlaceOrder,
    StopLoss,
    Candles,
}

/// How accepted orders turn into position changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Position changes are visible immediately.
    #[default]
    Immediate,
    /// Position changes become visible after this many position queries.
    AfterPolls(u32),
    /// Orders are acknowledged but never change positions.
    Never,
}

/// Stop currently attached to a paper position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperStop {
    pub stop_price: Price,
    pub request: StopLossRequest,
}

#[derive(Debug)]
struct PendingFill {
    request: OrderRequest,
    fill_price: Price,
    polls_left: u32,
}

#[derive(Debug, Default)]
struct PaperState {
    margin: Decimal,
    prices: HashMap<String, Price>,
    positions: Vec<Position>,
    candles: HashMap<String, Vec<Candle>>,
    stops: HashMap<(String, PositionSide), PaperStop>,
    orders: Vec<OrderRequest>,
    pending: Vec<PendingFill>,
    failures: HashMap<PaperOp, VecDeque<GatewayError>>,
    fill_mode: FillMode,
    next_order_id: u64,
}

impl PaperState {
    fn take_failure(&mut self, op: PaperOp) -> GatewayResult<()> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply_fill(&mut self, request: &OrderRequest, fill_price: Price) {
        let existing = self
            .positions
            .iter()
            .position(|p| p.symbol == request.symbol && p.side == Some(request.pos_side));

        if request.reduce_only {
            if let Some(idx) = existing {
                let remaining = self.positions[idx].size.inner() - request.quantity.inner();
                if remaining <= Decimal::ZERO {
                    self.positions.remove(idx);
                    self.stops
                        .remove(&(request.symbol.clone(), request.pos_side));
                } else {
                    self.positions[idx].size = Size::new(remaining);
                }
            }
            return;
        }

        match existing {
            Some(idx) => {
                let pos = &mut self.positions[idx];
                let old = pos.size.inner();
                let added = request.quantity.inner();
                let total = old + added;
                let avg = (pos.entry_price.inner() * old + fill_price.inner() * added) / total;
                pos.size = Size::new(total);
                pos.entry_price = Price::new(avg);
            }
            None => self.positions.push(Position {
                symbol: request.symbol.clone(),
                side: Some(request.pos_side),
                size: request.quantity,
                entry_price: fill_price,
            }),
        }
    }

    fn advance_pending(&mut self) {
        let mut ready = Vec::new();
        self.pending.retain_mut(|fill| {
            if fill.polls_left <= 1 {
                ready.push((fill.request.clone(), fill.fill_price));
                false
            } else {
                fill.polls_left -= 1;
                true
            }
        });
        for (request, price) in ready {
            self.apply_fill(&request, price);
        }
    }
}

/// Paper trading gateway.
#[derive(Debug)]
pub struct PaperGateway {
    name: String,
    state: Mutex<PaperState>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new("paper")
    }
}

impl PaperGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PaperState::default()),
        }
    }

    pub fn set_margin(&self, margin: Decimal) {
        self.state.lock().margin = margin;
    }

    pub fn set_price(&self, symbol: &str, price: Price) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state.lock().candles.insert(symbol.to_string(), candles);
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.state.lock().fill_mode = mode;
    }

    /// Seed an open position directly.
    pub fn open_position(&self, symbol: &str, side: PositionSide, size: Size, entry: Price) {
        self.state.lock().positions.push(Position {
            symbol: symbol.to_string(),
            side: Some(side),
            size,
            entry_price: entry,
        });
    }

    /// Seed a position whose side the exchange reported in an unknown form.
    pub fn open_unknown_position(&self, symbol: &str, size: Size) {
        self.state.lock().positions.push(Position {
            symbol: symbol.to_string(),
            side: None,
            size,
            entry_price: Price::ZERO,
        });
    }

    /// Drop every position on `symbol` as if closed outside the bot.
    pub fn clear_positions(&self, symbol: &str) {
        let mut state = self.state.lock();
        state.positions.retain(|p| p.symbol != symbol);
        state.stops.retain(|(s, _), _| s != symbol);
    }

    /// Fail the next call to `op` with `err`. Calls queue up in order.
    pub fn fail_next(&self, op: PaperOp, err: GatewayError) {
        self.state.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Fail the next `times` calls to `op` with `err`.
    pub fn fail_times(&self, op: PaperOp, err: GatewayError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// Orders accepted so far, in submission order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().orders.clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state.lock().positions.clone()
    }

    pub fn stop_for(&self, symbol: &str, side: PositionSide) -> Option<PaperStop> {
        self.state
            .lock()
            .stops
            .get(&(symbol.to_string(), side))
            .cloned()
    }
}

impl ExchangeGateway for PaperGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_available_margin(&self, _symbol: &str) -> BoxFuture<'_, GatewayResult<Decimal>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::Margin)?;
            Ok(state.margin)
        })
    }

    fn get_ticker(&self, symbol: &str) -> BoxFuture<'_, GatewayResult<Price>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::Ticker)?;
            state.prices.get(&symbol).copied().ok_or_else(|| GatewayError::Rejected {
                code: 10001,
                message: format!("no ticker for {symbol}"),
            })
        })
    }

    fn get_open_positions(
        &self,
        symbol: Option<&str>,
    ) -> BoxFuture<'_, GatewayResult<Vec<Position>>> {
        let symbol = symbol.map(str::to_string);
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::Positions)?;
            state.advance_pending();
            Ok(state
                .positions
                .iter()
                .filter(|p| symbol.as_deref().map_or(true, |s| p.symbol == s))
                .cloned()
                .collect())
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderAck>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::PlaceOrder)?;

            let fill_price = match request.price {
                Some(limit) => limit,
                None => state.prices.get(&request.symbol).copied().ok_or_else(|| {
                    GatewayError::Rejected {
                        code: 10001,
                        message: format!("no ticker for {}", request.symbol),
                    }
                })?,
            };

            if request.reduce_only
                && !state
                    .positions
                    .iter()
                    .any(|p| p.symbol == request.symbol && p.side == Some(request.pos_side))
            {
                return Err(GatewayError::Rejected {
                    code: 110017,
                    message: "reduce-only order has no position to reduce".to_string(),
                });
            }

            state.next_order_id += 1;
            let order_id = format!("paper-{}", state.next_order_id);
            state.orders.push(request.clone());

            let fill_mode = state.fill_mode;
            match fill_mode {
                FillMode::Immediate => state.apply_fill(&request, fill_price),
                FillMode::AfterPolls(polls) => state.pending.push(PendingFill {
                    request: request.clone(),
                    fill_price,
                    polls_left: polls,
                }),
                FillMode::Never => {}
            }

            debug!(
                symbol = %request.symbol,
                side = %request.side,
                qty = %request.quantity,
                reduce_only = request.reduce_only,
                order_id = %order_id,
                "Paper order accepted"
            );

            let raw = json!({
                "orderId": order_id,
                "orderLinkId": request.client_order_id.clone().unwrap_or_default(),
                "symbol": request.symbol,
                "side": request.side.to_string(),
                "qty": request.quantity.to_string(),
                "avgPrice": fill_price.to_string(),
                "reduceOnly": request.reduce_only,
                "createdTime": Utc::now().timestamp_millis(),
            });

            Ok(OrderAck {
                exchange_order_id: order_id,
                client_order_id: request.client_order_id,
                avg_price: Some(fill_price),
                raw,
            })
        })
    }

    fn set_stop_loss(
        &self,
        request: StopLossRequest,
    ) -> BoxFuture<'_, GatewayResult<serde_json::Value>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::StopLoss)?;

            let has_position = state
                .positions
                .iter()
                .any(|p| p.is_open(&request.symbol, request.pos_side));
            if !has_position {
                return Err(GatewayError::Rejected {
                    code: 10001,
                    message: format!(
                        "no open {} position on {}",
                        request.pos_side.as_str(),
                        request.symbol
                    ),
                });
            }

            let raw = json!({
                "symbol": request.symbol,
                "positionSide": request.pos_side.as_str(),
                "stopLoss": request.stop_price.to_string(),
                "slTriggerBy": request.trigger.as_str(),
            });
            state.stops.insert(
                (request.symbol.clone(), request.pos_side),
                PaperStop {
                    stop_price: request.stop_price,
                    request,
                },
            );
            Ok(raw)
        })
    }

    fn get_candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<Candle>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let mut state = self.state.lock();
            state.take_failure(PaperOp::Candles)?;
            let candles = state.candles.get(&symbol).cloned().unwrap_or_default();
            let skip = candles.len().saturating_sub(limit);
            Ok(candles.into_iter().skip(skip).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gateway() -> PaperGateway {
        let gw = PaperGateway::default();
        gw.set_margin(dec!(1000));
        gw.set_price("BTCUSDT", Price::new(dec!(50000)));
        gw
    }

    fn market(side: OrderSide, pos_side: PositionSide, qty: Decimal) -> OrderRequest {
        OrderRequest::builder("BTCUSDT", side, pos_side, Size::new(qty))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_market_order_opens_position_at_ticker() {
        let gw = gateway();
        let ack = gw
            .place_order(market(OrderSide::Buy, PositionSide::Long, dec!(0.1)))
            .await
            .unwrap();

        assert_eq!(ack.avg_price, Some(Price::new(dec!(50000))));
        assert_eq!(ack.raw["orderId"], "paper-1");

        let positions = gw.get_open_positions(Some("BTCUSDT")).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].is_open("BTCUSDT", PositionSide::Long));
        assert_eq!(positions[0].size, Size::new(dec!(0.1)));
    }

    #[tokio::test]
    async fn test_reduce_only_closes_position_and_stop() {
        let gw = gateway();
        gw.open_position("BTCUSDT", PositionSide::Short, Size::new(dec!(0.2)), Price::new(dec!(51000)));
        gw.set_stop_loss(StopLossRequest::new("BTCUSDT", PositionSide::Short, Price::new(dec!(52000))))
            .await
            .unwrap();

        let close = OrderRequest::builder("BTCUSDT", OrderSide::Buy, PositionSide::Short, Size::new(dec!(0.2)))
            .reduce_only(true)
            .build()
            .unwrap();
        gw.place_order(close).await.unwrap();

        assert!(gw.positions().is_empty());
        assert!(gw.stop_for("BTCUSDT", PositionSide::Short).is_none());
    }

    #[tokio::test]
    async fn test_reduce_only_without_position_rejected() {
        let gw = gateway();
        let close = OrderRequest::builder("BTCUSDT", OrderSide::Sell, PositionSide::Long, Size::new(dec!(1)))
            .reduce_only(true)
            .build()
            .unwrap();
        let result = gw.place_order(close).await;
        assert!(matches!(result, Err(GatewayError::Rejected { code: 110017, .. })));
    }

    #[tokio::test]
    async fn test_failure_injection_is_consumed() {
        let gw = gateway();
        gw.fail_next(PaperOp::Ticker, GatewayError::Timeout);

        assert!(matches!(gw.get_ticker("BTCUSDT").await, Err(GatewayError::Timeout)));
        assert_eq!(gw.get_ticker("BTCUSDT").await.unwrap(), Price::new(dec!(50000)));
    }

    #[tokio::test]
    async fn test_delayed_fill_appears_after_polls() {
        let gw = gateway();
        gw.set_fill_mode(FillMode::AfterPolls(2));
        gw.place_order(market(OrderSide::Buy, PositionSide::Long, dec!(0.1)))
            .await
            .unwrap();

        assert!(gw.get_open_positions(Some("BTCUSDT")).await.unwrap().is_empty());
        assert_eq!(gw.get_open_positions(Some("BTCUSDT")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_never_fill_keeps_account_flat() {
        let gw = gateway();
        gw.set_fill_mode(FillMode::Never);
        gw.place_order(market(OrderSide::Buy, PositionSide::Long, dec!(0.1)))
            .await
            .unwrap();
        assert!(gw.get_open_positions(None).await.unwrap().is_empty());
        assert_eq!(gw.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_flattens_both_sides() {
        let gw = gateway();
        gw.open_position("BTCUSDT", PositionSide::Long, Size::new(dec!(0.3)), Price::new(dec!(49000)));
        gw.open_position("BTCUSDT", PositionSide::Short, Size::new(dec!(0.1)), Price::new(dec!(51000)));
        gw.open_position("ETHUSDT", PositionSide::Long, Size::new(dec!(2)), Price::new(dec!(3000)));

        gw.close_all("BTCUSDT").await.unwrap();

        let remaining = gw.positions();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].symbol, "ETHUSDT");
        assert!(gw.orders().iter().all(|o| o.reduce_only));
    }

    #[tokio::test]
    async fn test_adding_to_position_averages_entry() {
        let gw = gateway();
        gw.place_order(market(OrderSide::Buy, PositionSide::Long, dec!(1)))
            .await
            .unwrap();
        gw.set_price("BTCUSDT", Price::new(dec!(52000)));
        gw.place_order(market(OrderSide::Buy, PositionSide::Long, dec!(1)))
            .await
            .unwrap();

        let positions = gw.positions();
        assert_eq!(positions[0].size, Size::new(dec!(2)));
        assert_eq!(positions[0].entry_price, Price::new(dec!(51000)));
    }

    #[tokio::test]
    async fn test_candles_limited_to_most_recent() {
        let gw = gateway();
        let bar = |close| Candle {
            start: Utc::now(),
            open: Price::new(dec!(100)),
            high: Price::new(dec!(110)),
            low: Price::new(dec!(90)),
            close: Price::new(close),
        };
        gw.set_candles("BTCUSDT", vec![bar(dec!(101)), bar(dec!(102)), bar(dec!(103))]);

        let candles = gw.get_candles("BTCUSDT", "15", 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, Price::new(dec!(103)));
    }
}
