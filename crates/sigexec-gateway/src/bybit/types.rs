//! Bybit v5 response shapes and their mapping onto core types.
//!
//! Bybit wraps every response in `{retCode, retMsg, result, time}` and encodes
//! all numbers as strings.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sigexec_core::{Candle, Position, PositionSide, Price, Size};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::OrderAck;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Split a response body into `(result, raw)`; non-zero `retCode` is a rejection.
pub(crate) fn unwrap_envelope(body: &str) -> GatewayResult<(serde_json::Value, serde_json::Value)> {
    let raw: serde_json::Value = serde_json::from_str(body)?;
    let envelope: Envelope = serde_json::from_value(raw.clone())?;
    if envelope.ret_code != 0 {
        return Err(GatewayError::Rejected {
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }
    Ok((envelope.result, raw))
}

/// `positionIdx` for an order or stop: 1/2 in hedge mode, 0 in one-way mode.
pub(crate) fn position_idx(pos_side: PositionSide, hedge_mode: bool) -> u8 {
    if !hedge_mode {
        return 0;
    }
    match pos_side {
        PositionSide::Long => 1,
        PositionSide::Short => 2,
    }
}

fn decimal(field: &str, raw: &str) -> GatewayResult<Decimal> {
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    raw.parse()
        .map_err(|e| GatewayError::Decode(format!("{field}={raw:?}: {e}")))
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletAccount {
    #[serde(default)]
    total_available_balance: String,
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
    #[serde(default)]
    available_to_withdraw: String,
}

/// Available USDT margin from `/v5/account/wallet-balance`.
pub(crate) fn parse_available_margin(result: serde_json::Value) -> GatewayResult<Decimal> {
    let parsed: ListResult<WalletAccount> = serde_json::from_value(result)?;
    let account = parsed
        .list
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::Decode("wallet-balance list is empty".to_string()))?;

    if let Some(usdt) = account.coin.iter().find(|c| c.coin == "USDT") {
        if !usdt.available_to_withdraw.is_empty() {
            return decimal("availableToWithdraw", &usdt.available_to_withdraw);
        }
        if account.total_available_balance.is_empty() {
            return decimal("walletBalance", &usdt.wallet_balance);
        }
    }
    decimal("totalAvailableBalance", &account.total_available_balance)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRow {
    symbol: String,
    last_price: String,
}

/// Last traded price from `/v5/market/tickers`.
pub(crate) fn parse_last_price(result: serde_json::Value, symbol: &str) -> GatewayResult<Price> {
    let parsed: ListResult<TickerRow> = serde_json::from_value(result)?;
    let row = parsed
        .list
        .into_iter()
        .find(|r| r.symbol == symbol)
        .ok_or_else(|| GatewayError::Decode(format!("no ticker row for {symbol}")))?;
    Ok(Price::new(decimal("lastPrice", &row.last_price)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    avg_price: String,
    #[serde(default)]
    position_idx: u8,
}

/// Non-empty positions from `/v5/position/list`.
///
/// Hedge mode identifies the leg by `positionIdx`; one-way mode by `side`.
/// A non-empty position that matches neither is returned with `side: None`.
pub(crate) fn parse_positions(
    result: serde_json::Value,
    hedge_mode: bool,
) -> GatewayResult<Vec<Position>> {
    let parsed: ListResult<PositionRow> = serde_json::from_value(result)?;
    let mut positions = Vec::new();
    for row in parsed.list {
        let size = decimal("size", &row.size)?;
        if size.is_zero() {
            continue;
        }
        let side = match (hedge_mode, row.position_idx, row.side.as_str()) {
            (true, 1, _) => Some(PositionSide::Long),
            (true, 2, _) => Some(PositionSide::Short),
            (_, _, "Buy") => Some(PositionSide::Long),
            (_, _, "Sell") => Some(PositionSide::Short),
            _ => None,
        };
        positions.push(Position {
            symbol: row.symbol,
            side,
            size: Size::new(size.abs()),
            entry_price: Price::new(decimal("avgPrice", &row.avg_price)?),
        });
    }
    Ok(positions)
}

/// Candles from `/v5/market/kline`, reordered oldest first.
///
/// Each row is `[startMs, open, high, low, close, volume, turnover]`.
pub(crate) fn parse_klines(result: serde_json::Value) -> GatewayResult<Vec<Candle>> {
    let parsed: ListResult<Vec<String>> = serde_json::from_value(result)?;
    let mut candles = Vec::with_capacity(parsed.list.len());
    for row in parsed.list {
        if row.len() < 5 {
            return Err(GatewayError::Decode(format!(
                "kline row has {} fields, expected at least 5",
                row.len()
            )));
        }
        let start_ms: i64 = row[0]
            .parse()
            .map_err(|e| GatewayError::Decode(format!("kline start {:?}: {e}", row[0])))?;
        let start = Utc
            .timestamp_millis_opt(start_ms)
            .single()
            .ok_or_else(|| GatewayError::Decode(format!("kline start out of range: {start_ms}")))?;
        candles.push(Candle {
            start,
            open: Price::new(decimal("open", &row[1])?),
            high: Price::new(decimal("high", &row[2])?),
            low: Price::new(decimal("low", &row[3])?),
            close: Price::new(decimal("close", &row[4])?),
        });
    }
    candles.sort_by_key(|c| c.start);
    Ok(candles)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResult {
    order_id: String,
    #[serde(default)]
    order_link_id: String,
}

/// Acknowledgement from `/v5/order/create`.
pub(crate) fn parse_order_ack(
    result: serde_json::Value,
    raw: serde_json::Value,
) -> GatewayResult<OrderAck> {
    let parsed: CreateOrderResult = serde_json::from_value(result)?;
    if parsed.order_id.is_empty() {
        return Err(GatewayError::Decode("order/create returned no orderId".to_string()));
    }
    Ok(OrderAck {
        exchange_order_id: parsed.order_id,
        client_order_id: (!parsed.order_link_id.is_empty()).then_some(parsed.order_link_id),
        avg_price: None,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_non_zero_ret_code_is_rejection() {
        let body = r#"{"retCode":110007,"retMsg":"ab not enough for new order","result":{},"time":1}"#;
        match unwrap_envelope(body) {
            Err(GatewayError::Rejected { code, message }) => {
                assert_eq!(code, 110007);
                assert!(message.contains("not enough"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        assert!(matches!(unwrap_envelope("<html>"), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn test_position_idx() {
        assert_eq!(position_idx(PositionSide::Long, true), 1);
        assert_eq!(position_idx(PositionSide::Short, true), 2);
        assert_eq!(position_idx(PositionSide::Short, false), 0);
    }

    #[test]
    fn test_parse_wallet_balance() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"accountType":"UNIFIED","totalAvailableBalance":"950.5","coin":[{"coin":"USDT","walletBalance":"1000","availableToWithdraw":"900.25"}]}]}}"#;
        let (result, _) = unwrap_envelope(body).unwrap();
        assert_eq!(parse_available_margin(result).unwrap(), dec!(900.25));

        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"totalAvailableBalance":"950.5","coin":[{"coin":"USDT","walletBalance":"1000","availableToWithdraw":""}]}]}}"#;
        let (result, _) = unwrap_envelope(body).unwrap();
        assert_eq!(parse_available_margin(result).unwrap(), dec!(950.5));
    }

    #[test]
    fn test_parse_ticker() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"category":"linear","list":[{"symbol":"BTCUSDT","lastPrice":"64250.10"}]}}"#;
        let (result, _) = unwrap_envelope(body).unwrap();
        assert_eq!(
            parse_last_price(result, "BTCUSDT").unwrap(),
            Price::new(dec!(64250.10))
        );
    }

    #[test]
    fn test_parse_positions_hedge_and_one_way() {
        let result = serde_json::json!({"list": [
            {"symbol": "BTCUSDT", "side": "Buy", "size": "0.5", "avgPrice": "60000", "positionIdx": 1},
            {"symbol": "BTCUSDT", "side": "Sell", "size": "0.2", "avgPrice": "61000", "positionIdx": 2},
            {"symbol": "BTCUSDT", "side": "", "size": "0", "avgPrice": "0", "positionIdx": 0}
        ]});
        let positions = parse_positions(result, true).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].side, Some(PositionSide::Long));
        assert_eq!(positions[1].side, Some(PositionSide::Short));
        assert_eq!(positions[1].size, Size::new(dec!(0.2)));

        let result = serde_json::json!({"list": [
            {"symbol": "ETHUSDT", "side": "Sell", "size": "3", "avgPrice": "3000", "positionIdx": 0}
        ]});
        let positions = parse_positions(result, false).unwrap();
        assert_eq!(positions[0].side, Some(PositionSide::Short));
    }

    #[test]
    fn test_parse_positions_unknown_side() {
        let result = serde_json::json!({"list": [
            {"symbol": "BTCUSDT", "side": "None", "size": "1", "avgPrice": "60000", "positionIdx": 0}
        ]});
        let positions = parse_positions(result, false).unwrap();
        assert_eq!(positions[0].side, None);
    }

    #[test]
    fn test_parse_klines_reorders_oldest_first() {
        let result = serde_json::json!({"list": [
            ["1700000900000", "101", "103", "100", "102", "5", "510"],
            ["1700000000000", "100", "102", "99", "101", "4", "404"]
        ]});
        let candles = parse_klines(result).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, Price::new(dec!(100)));
        assert_eq!(candles[1].close, Price::new(dec!(102)));
        assert!(candles[0].start < candles[1].start);
    }

    #[test]
    fn test_parse_klines_short_row() {
        let result = serde_json::json!({"list": [["1700000000000", "100"]]});
        assert!(matches!(parse_klines(result), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn test_parse_order_ack() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"orderId":"1321003749386327552","orderLinkId":"sig-1"},"time":1700000000000}"#;
        let (result, raw) = unwrap_envelope(body).unwrap();
        let ack = parse_order_ack(result, raw).unwrap();
        assert_eq!(ack.exchange_order_id, "1321003749386327552");
        assert_eq!(ack.client_order_id.as_deref(), Some("sig-1"));
        assert_eq!(ack.raw["time"], 1700000000000i64);
    }
}
