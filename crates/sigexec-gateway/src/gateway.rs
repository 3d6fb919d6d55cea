//! Exchange gateway contract.
//!
//! The controller depends only on [`ExchangeGateway`]; each exchange gets one
//! adapter. Methods return [`BoxFuture`] so the trait stays dyn-compatible and
//! adapters can be swapped behind an `Arc<dyn ExchangeGateway>`.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sigexec_core::{Candle, OrderSide, OrderType, Position, PositionSide, Price, Size};

use crate::error::{GatewayError, GatewayResult};

pub use sigexec_core::BoxFuture;

/// Price used to trigger a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TriggerType {
    #[default]
    LastPrice,
    MarkPrice,
    IndexPrice,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastPrice => "LastPrice",
            Self::MarkPrice => "MarkPrice",
            Self::IndexPrice => "IndexPrice",
        }
    }
}

/// Validated order submission. Built with [`OrderRequest::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub pos_side: PositionSide,
    pub quantity: Size,
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    pub reduce_only: bool,
    /// Idempotency tag forwarded to the exchange.
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Start a market order for `quantity` on `symbol`.
    pub fn builder(
        symbol: impl Into<String>,
        side: OrderSide,
        pos_side: PositionSide,
        quantity: Size,
    ) -> OrderRequestBuilder {
        OrderRequestBuilder {
            symbol: symbol.into(),
            side,
            pos_side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }
}

/// Builder for [`OrderRequest`].
#[derive(Debug, Clone)]
#[must_use]
pub struct OrderRequestBuilder {
    symbol: String,
    side: OrderSide,
    pos_side: PositionSide,
    quantity: Size,
    order_type: OrderType,
    price: Option<Price>,
    reduce_only: bool,
    client_order_id: Option<String>,
}

impl OrderRequestBuilder {
    pub fn limit(mut self, price: Price) -> Self {
        self.order_type = OrderType::Limit;
        self.price = Some(price);
        self
    }

    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }

    pub fn client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Validate and freeze the request.
    pub fn build(self) -> GatewayResult<OrderRequest> {
        if self.symbol.is_empty() {
            return Err(GatewayError::InvalidRequest("symbol is empty".to_string()));
        }
        if !self.quantity.is_positive() {
            return Err(GatewayError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type == OrderType::Limit && !self.price.is_some_and(|p| p.is_positive()) {
            return Err(GatewayError::InvalidRequest(
                "limit order requires a positive price".to_string(),
            ));
        }
        Ok(OrderRequest {
            symbol: self.symbol,
            side: self.side,
            pos_side: self.pos_side,
            quantity: self.quantity,
            order_type: self.order_type,
            price: self.price,
            reduce_only: self.reduce_only,
            client_order_id: self.client_order_id,
        })
    }
}

/// Normalized acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    /// Average fill price when the exchange reports one synchronously.
    pub avg_price: Option<Price>,
    /// Raw exchange payload for audit.
    pub raw: serde_json::Value,
}

/// Protective stop to attach to (or move on) an open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopLossRequest {
    pub symbol: String,
    pub pos_side: PositionSide,
    pub stop_price: Price,
    pub trigger: TriggerType,
    pub reduce_only: bool,
}

impl StopLossRequest {
    pub fn new(symbol: impl Into<String>, pos_side: PositionSide, stop_price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            pos_side,
            stop_price,
            trigger: TriggerType::default(),
            reduce_only: true,
        }
    }
}

/// One exchange account, addressed over its API.
pub trait ExchangeGateway: Send + Sync {
    /// Adapter name used in logs and metrics.
    fn name(&self) -> &str;

    /// Available quote-currency margin (USDT).
    fn get_available_margin(&self, symbol: &str) -> BoxFuture<'_, GatewayResult<Decimal>>;

    /// Last traded price.
    fn get_ticker(&self, symbol: &str) -> BoxFuture<'_, GatewayResult<Price>>;

    /// Open positions, optionally filtered to one symbol.
    fn get_open_positions(&self, symbol: Option<&str>)
        -> BoxFuture<'_, GatewayResult<Vec<Position>>>;

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderAck>>;

    /// Attach or replace the stop on a position. Returns the raw payload.
    fn set_stop_loss(
        &self,
        request: StopLossRequest,
    ) -> BoxFuture<'_, GatewayResult<serde_json::Value>>;

    /// Recent candles, oldest first.
    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<Candle>>>;

    /// Best-effort flatten: a reduce-only market order per open position.
    fn close_all(&self, symbol: &str) -> BoxFuture<'_, GatewayResult<()>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let positions = self.get_open_positions(Some(&symbol)).await?;
            for position in positions
                .into_iter()
                .filter(|p| p.symbol == symbol && !p.size.is_zero())
            {
                let pos_side = position.side.ok_or_else(|| {
                    GatewayError::Decode(format!("position on {symbol} has no side"))
                })?;
                let request = OrderRequest::builder(
                    symbol.clone(),
                    pos_side.close_side(),
                    pos_side,
                    position.size.abs(),
                )
                .reduce_only(true)
                .build()?;
                self.place_order(request).await?;
            }
            Ok(())
        })
    }
}

/// Arc wrapper for gateway trait objects.
pub type DynGateway = Arc<dyn ExchangeGateway>;
