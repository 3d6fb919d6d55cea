//! Flatten planning.
//!
//! Converts the open positions for a symbol into reduce-only close requests.
//! Each request maps to one exit order row so the close is audited under its
//! own idempotency key.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sigexec_core::{
    NewOrder, OrderDirection, OrderSide, OrderType, Position, PositionSide, Size,
};

use crate::error::{PositionError, PositionResult};

/// Reason for flattening a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlattenReason {
    /// Clearing stale exposure before entering a new signal.
    NewSignal { signal_id: String },
    /// Sizing resolved to zero for the current session.
    NoTrade,
}

impl std::fmt::Display for FlattenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSignal { signal_id } => write!(f, "NewSignal({signal_id})"),
            Self::NoTrade => write!(f, "NoTrade"),
        }
    }
}

/// Request to close one position with a reduce-only market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenRequest {
    pub symbol: String,
    /// Side of the position being closed.
    pub pos_side: PositionSide,
    /// Direction of the reduce-only order (opposite of the position).
    pub side: OrderSide,
    /// Size to close.
    pub size: Size,
    pub reason: FlattenReason,
}

impl FlattenRequest {
    /// Exit order row for this close, keyed off the signal being entered.
    pub fn exit_order(&self, user_id: &str, exchange_id: &str, signal_id: &str) -> NewOrder {
        NewOrder {
            user_id: user_id.to_string(),
            exchange_id: exchange_id.to_string(),
            external_id: NewOrder::exit_external_id(signal_id, self.pos_side),
            symbol: self.symbol.clone(),
            side: self.side,
            pos_side: self.pos_side,
            order_type: OrderType::Market,
            quantity: self.size,
            price: None,
            stop_loss_pct: Decimal::ZERO,
            order_dir: OrderDirection::Exit,
        }
    }
}

/// Plan reduce-only closes for every non-zero position on `symbol`.
///
/// Positions on other symbols are ignored. A position whose side the gateway
/// could not map fails the whole plan so no entry is placed over exposure we
/// cannot close.
pub fn plan_flatten(
    positions: &[Position],
    symbol: &str,
    reason: FlattenReason,
) -> PositionResult<Vec<FlattenRequest>> {
    let mut requests = Vec::new();

    for position in positions {
        if position.symbol != symbol {
            continue;
        }
        let size = position.size.abs();
        if size.is_zero() {
            tracing::debug!(symbol = %symbol, "Position size is zero, skipping flatten");
            continue;
        }
        let Some(pos_side) = position.side else {
            return Err(PositionError::UnknownSide {
                symbol: position.symbol.clone(),
            });
        };

        requests.push(FlattenRequest {
            symbol: position.symbol.clone(),
            pos_side,
            side: pos_side.close_side(),
            size,
            reason: reason.clone(),
        });
    }

    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sigexec_core::Price;

    fn position(symbol: &str, side: Option<PositionSide>, size: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            side,
            size: Size::new(size),
            entry_price: Price::new(dec!(100)),
        }
    }

    #[test]
    fn test_flatten_reason_display() {
        assert_eq!(
            FlattenReason::NewSignal {
                signal_id: "s1".to_string()
            }
            .to_string(),
            "NewSignal(s1)"
        );
        assert_eq!(FlattenReason::NoTrade.to_string(), "NoTrade");
    }

    #[test]
    fn test_plan_uses_opposite_side() {
        let positions = vec![
            position("BTCUSDT", Some(PositionSide::Long), dec!(0.5)),
            position("BTCUSDT", Some(PositionSide::Short), dec!(0.2)),
        ];
        let plan = plan_flatten(&positions, "BTCUSDT", FlattenReason::NoTrade).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].side, OrderSide::Sell);
        assert_eq!(plan[0].size, Size::new(dec!(0.5)));
        assert_eq!(plan[1].side, OrderSide::Buy);
        assert_eq!(plan[1].pos_side, PositionSide::Short);
    }

    #[test]
    fn test_plan_skips_zero_and_other_symbols() {
        let positions = vec![
            position("BTCUSDT", Some(PositionSide::Long), dec!(0)),
            position("ETHUSDT", Some(PositionSide::Long), dec!(3)),
        ];
        let plan = plan_flatten(&positions, "BTCUSDT", FlattenReason::NoTrade).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_normalizes_negative_size() {
        let positions = vec![position("BTCUSDT", Some(PositionSide::Short), dec!(-0.3))];
        let plan = plan_flatten(&positions, "BTCUSDT", FlattenReason::NoTrade).unwrap();
        assert_eq!(plan[0].size, Size::new(dec!(0.3)));
    }

    #[test]
    fn test_plan_rejects_unknown_side() {
        let positions = vec![
            position("BTCUSDT", Some(PositionSide::Long), dec!(1)),
            position("BTCUSDT", None, dec!(1)),
        ];
        let result = plan_flatten(&positions, "BTCUSDT", FlattenReason::NoTrade);
        assert!(matches!(result, Err(PositionError::UnknownSide { .. })));
    }

    #[test]
    fn test_exit_order_row() {
        let request = FlattenRequest {
            symbol: "BTCUSDT".to_string(),
            pos_side: PositionSide::Short,
            side: OrderSide::Buy,
            size: Size::new(dec!(0.2)),
            reason: FlattenReason::NoTrade,
        };
        let order = request.exit_order("u1", "bybit", "sig-7");
        assert_eq!(order.external_id, "sig-7:close-short");
        assert_eq!(order.order_dir, OrderDirection::Exit);
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.quantity, Size::new(dec!(0.2)));
    }
}
