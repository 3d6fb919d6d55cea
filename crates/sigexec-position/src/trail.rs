//! Directional trailing stop-loss.
//!
//! A stop only ever tightens: non-decreasing for longs, non-increasing for
//! shorts. Each step looks at the bar before the most recent one ("previous")
//! and trails only when that bar closed in the position's favour.
//!
//! - Long: candidate = min(mean low over lookback, previous.low)
//! - Short: candidate = max(mean high over lookback, previous.high)

use rust_decimal::Decimal;
use sigexec_core::{Candle, PositionSide, Price};

use crate::error::{PositionError, PositionResult};

/// Lookback used when the configured value is zero or negative.
pub const DEFAULT_LOOKBACK: i64 = 20;

const MIN_CANDLES: usize = 2;

/// Outcome of one trailing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopUpdate {
    pub new_stop: Price,
    pub moved: bool,
}

impl StopUpdate {
    fn unchanged(current: Price) -> Self {
        Self {
            new_stop: current,
            moved: false,
        }
    }
}

/// Compute the next stop for a held position.
///
/// `window` is ordered oldest first. `lookback` is clamped to
/// `[1, window.len()]`; zero or negative selects [`DEFAULT_LOOKBACK`].
pub fn next_stop(
    side: PositionSide,
    current_stop: Price,
    window: &[Candle],
    lookback: i64,
) -> PositionResult<StopUpdate> {
    if window.len() < MIN_CANDLES {
        return Err(PositionError::InsufficientCandles {
            needed: MIN_CANDLES,
            got: window.len(),
        });
    }

    let lookback = effective_lookback(lookback, window.len());
    let recent = &window[window.len() - lookback..];
    let previous = &window[window.len() - 2];

    let update = match side {
        PositionSide::Long => {
            if !previous.is_bullish() {
                return Ok(StopUpdate::unchanged(current_stop));
            }
            let floor_avg = mean(recent.iter().map(|c| c.low.inner()), lookback);
            let candidate = Price::new(floor_avg).min(previous.low);
            if candidate > current_stop {
                StopUpdate {
                    new_stop: candidate,
                    moved: true,
                }
            } else {
                StopUpdate::unchanged(current_stop)
            }
        }
        PositionSide::Short => {
            if !previous.is_bearish() {
                return Ok(StopUpdate::unchanged(current_stop));
            }
            let ceil_avg = mean(recent.iter().map(|c| c.high.inner()), lookback);
            let candidate = Price::new(ceil_avg).max(previous.high);
            if candidate < current_stop {
                StopUpdate {
                    new_stop: candidate,
                    moved: true,
                }
            } else {
                StopUpdate::unchanged(current_stop)
            }
        }
    };

    tracing::trace!(
        side = %side,
        current = %current_stop,
        new = %update.new_stop,
        moved = update.moved,
        lookback,
        "Trailing step"
    );

    Ok(update)
}

fn effective_lookback(lookback: i64, len: usize) -> usize {
    let requested = if lookback <= 0 {
        DEFAULT_LOOKBACK
    } else {
        lookback
    };
    usize::try_from(requested).unwrap_or(len).clamp(1, len)
}

fn mean(values: impl Iterator<Item = Decimal>, count: usize) -> Decimal {
    let sum: Decimal = values.sum();
    sum / Decimal::from(count)
}
