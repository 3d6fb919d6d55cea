//! Bybit v5 linear-perpetual REST adapter.
//!
//! Every call is signed, bounded by the HTTP client timeout and retried per
//! [`RetryPolicy`] on transient failures. Orders carry `orderLinkId`, so a
//! retried create is rejected as a duplicate by the exchange rather than
//! opening twice.

mod signer;
mod types;

pub use signer::BybitCredentials;

use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sigexec_core::{Candle, Position, Price};
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, ExchangeGateway, OrderAck, OrderRequest, StopLossRequest};
use crate::retry::RetryPolicy;
use signer::{HEADER_API_KEY, HEADER_RECV_WINDOW, HEADER_SIGN, HEADER_TIMESTAMP};
use types::{
    parse_available_margin, parse_klines, parse_last_price, parse_order_ack, parse_positions,
    position_idx, unwrap_envelope,
};

const WALLET_BALANCE_PATH: &str = "/v5/account/wallet-balance";
const TICKERS_PATH: &str = "/v5/market/tickers";
const POSITION_LIST_PATH: &str = "/v5/position/list";
const KLINE_PATH: &str = "/v5/market/kline";
const ORDER_CREATE_PATH: &str = "/v5/order/create";
const TRADING_STOP_PATH: &str = "/v5/position/trading-stop";

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BybitConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Product category, `linear` for USDT perpetuals.
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Account runs in hedge (two-way) position mode.
    #[serde(default)]
    pub hedge_mode: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_category() -> String {
    "linear".to_string()
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            category: default_category(),
            recv_window_ms: default_recv_window_ms(),
            timeout_ms: default_timeout_ms(),
            hedge_mode: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bybit REST gateway for one account.
pub struct BybitGateway {
    name: String,
    client: Client,
    config: BybitConfig,
    credentials: BybitCredentials,
}

impl BybitGateway {
    pub fn new(
        name: impl Into<String>,
        config: BybitConfig,
        credentials: BybitCredentials,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {e}")))?;

        let name = name.into();
        info!(
            gateway = %name,
            base_url = %config.base_url,
            hedge_mode = config.hedge_mode,
            "Bybit gateway ready"
        );

        Ok(Self {
            name,
            client,
            config,
            credentials,
        })
    }

    fn query_string(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn order_body(&self, request: &OrderRequest) -> Value {
        let mut body = json!({
            "category": self.config.category,
            "symbol": request.symbol,
            "side": request.side.to_string(),
            "orderType": request.order_type.to_string(),
            "qty": request.quantity.to_string(),
            "reduceOnly": request.reduce_only,
            "positionIdx": position_idx(request.pos_side, self.config.hedge_mode),
        });
        if let Some(price) = request.price {
            body["price"] = json!(price.to_string());
            body["timeInForce"] = json!("GTC");
        }
        if let Some(link_id) = &request.client_order_id {
            body["orderLinkId"] = json!(link_id);
        }
        body
    }

    fn stop_body(&self, request: &StopLossRequest) -> Value {
        json!({
            "category": self.config.category,
            "symbol": request.symbol,
            "stopLoss": request.stop_price.to_string(),
            "slTriggerBy": request.trigger.as_str(),
            "tpslMode": "Full",
            "positionIdx": position_idx(request.pos_side, self.config.hedge_mode),
        })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        payload: &str,
    ) -> GatewayResult<(Value, Value)> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self
            .credentials
            .sign(timestamp, self.config.recv_window_ms, payload)?;

        let response = request
            .header(HEADER_API_KEY, self.credentials.api_key())
            .header(HEADER_SIGN, signature)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_RECV_WINDOW, self.config.recv_window_ms.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        unwrap_envelope(&body)
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> GatewayResult<(Value, Value)> {
        let query = Self::query_string(params);
        let url = format!("{}{}?{}", self.config.base_url, path, query);
        debug!(gateway = %self.name, path, "GET");
        self.execute(self.client.get(url), &query).await
    }

    async fn post(&self, path: &str, body: &Value) -> GatewayResult<(Value, Value)> {
        let payload = body.to_string();
        let url = format!("{}{}", self.config.base_url, path);
        debug!(gateway = %self.name, path, "POST");
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.clone());
        self.execute(request, &payload).await
    }
}

impl ExchangeGateway for BybitGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_available_margin(&self, _symbol: &str) -> BoxFuture<'_, GatewayResult<Decimal>> {
        Box::pin(async move {
            let params = [("accountType", "UNIFIED".to_string()), ("coin", "USDT".to_string())];
            let params = &params[..];
            let (result, _) = self
                .config
                .retry
                .run("get_available_margin", move || {
                    self.get(WALLET_BALANCE_PATH, params)
                })
                .await?;
            parse_available_margin(result)
        })
    }

    fn get_ticker(&self, symbol: &str) -> BoxFuture<'_, GatewayResult<Price>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let params = [
                ("category", self.config.category.clone()),
                ("symbol", symbol.clone()),
            ];
            let params = &params[..];
            let (result, _) = self
                .config
                .retry
                .run("get_ticker", move || self.get(TICKERS_PATH, params))
                .await?;
            parse_last_price(result, &symbol)
        })
    }

    fn get_open_positions(
        &self,
        symbol: Option<&str>,
    ) -> BoxFuture<'_, GatewayResult<Vec<Position>>> {
        let filter = match symbol {
            Some(s) => ("symbol", s.to_string()),
            None => ("settleCoin", "USDT".to_string()),
        };
        Box::pin(async move {
            let params = [("category", self.config.category.clone()), filter];
            let params = &params[..];
            let (result, _) = self
                .config
                .retry
                .run("get_open_positions", move || {
                    self.get(POSITION_LIST_PATH, params)
                })
                .await?;
            parse_positions(result, self.config.hedge_mode)
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderAck>> {
        Box::pin(async move {
            let body = self.order_body(&request);
            let body = &body;
            let (result, raw) = self
                .config
                .retry
                .run("place_order", move || self.post(ORDER_CREATE_PATH, body))
                .await?;
            let ack = parse_order_ack(result, raw)?;
            info!(
                gateway = %self.name,
                symbol = %request.symbol,
                side = %request.side,
                qty = %request.quantity,
                reduce_only = request.reduce_only,
                order_id = %ack.exchange_order_id,
                "Order accepted"
            );
            Ok(ack)
        })
    }

    fn set_stop_loss(
        &self,
        request: StopLossRequest,
    ) -> BoxFuture<'_, GatewayResult<Value>> {
        Box::pin(async move {
            let body = self.stop_body(&request);
            let body = &body;
            let (_, raw) = self
                .config
                .retry
                .run("set_stop_loss", move || self.post(TRADING_STOP_PATH, body))
                .await?;
            Ok(raw)
        })
    }

    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<Candle>>> {
        let symbol = symbol.to_string();
        let interval = interval.to_string();
        Box::pin(async move {
            let params = [
                ("category", self.config.category.clone()),
                ("symbol", symbol),
                ("interval", interval),
                ("limit", limit.to_string()),
            ];
            let params = &params[..];
            let (result, _) = self
                .config
                .retry
                .run("get_candles", move || self.get(KLINE_PATH, params))
                .await?;
            parse_klines(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sigexec_core::{OrderSide, PositionSide, Size};
    use zeroize::Zeroizing;

    fn gateway(hedge_mode: bool) -> BybitGateway {
        BybitGateway::new(
            "bybit",
            BybitConfig {
                hedge_mode,
                ..Default::default()
            },
            BybitCredentials::new("key", Zeroizing::new("secret".to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_query_string_keeps_order() {
        let qs = BybitGateway::query_string(&[
            ("category", "linear".to_string()),
            ("symbol", "BTCUSDT".to_string()),
        ]);
        assert_eq!(qs, "category=linear&symbol=BTCUSDT");
    }

    #[test]
    fn test_order_body_market_hedge() {
        let request = OrderRequest::builder(
            "BTCUSDT",
            OrderSide::Sell,
            PositionSide::Long,
            Size::new(dec!(0.01)),
        )
        .reduce_only(true)
        .client_order_id("sig-1:close-long")
        .build()
        .unwrap();

        let body = gateway(true).order_body(&request);
        assert_eq!(body["category"], "linear");
        assert_eq!(body["side"], "Sell");
        assert_eq!(body["orderType"], "Market");
        assert_eq!(body["qty"], "0.01");
        assert_eq!(body["reduceOnly"], true);
        assert_eq!(body["positionIdx"], 1);
        assert_eq!(body["orderLinkId"], "sig-1:close-long");
        assert!(body.get("price").is_none());
    }

    #[test]
    fn test_order_body_limit_one_way() {
        let request = OrderRequest::builder(
            "ETHUSDT",
            OrderSide::Buy,
            PositionSide::Long,
            Size::new(dec!(1)),
        )
        .limit(Price::new(dec!(3000.5)))
        .build()
        .unwrap();

        let body = gateway(false).order_body(&request);
        assert_eq!(body["orderType"], "Limit");
        assert_eq!(body["price"], "3000.5");
        assert_eq!(body["positionIdx"], 0);
        assert!(body.get("orderLinkId").is_none());
    }

    #[test]
    fn test_stop_body() {
        let request = StopLossRequest::new("BTCUSDT", PositionSide::Short, Price::new(dec!(65000)));
        let body = gateway(true).stop_body(&request);
        assert_eq!(body["stopLoss"], "65000");
        assert_eq!(body["slTriggerBy"], "LastPrice");
        assert_eq!(body["tpslMode"], "Full");
        assert_eq!(body["positionIdx"], 2);
    }

    #[test]
    fn test_config_defaults_from_empty_object() {
        let config: BybitConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BybitConfig::default());
        assert_eq!(config.category, "linear");
        assert_eq!(config.retry.max_attempts, 4);
    }
}
