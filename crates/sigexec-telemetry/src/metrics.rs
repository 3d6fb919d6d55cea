//! Prometheus metrics for the execution controller.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug that should crash at once.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Ticks by terminal outcome.
/// Labels: exchange, outcome (no_signal/in_flight/stop_moved/filled/...)
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigexec_ticks_total",
        "Total controller ticks by outcome",
        &["exchange", "outcome"]
    )
    .unwrap()
});

/// Tick wall-clock duration in milliseconds.
pub static TICK_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sigexec_tick_duration_ms",
        "Controller tick duration in milliseconds",
        &["exchange"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Failed ticks by error kind.
pub static TICK_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigexec_tick_errors_total",
        "Total failed ticks by error kind",
        &["exchange", "kind"]
    )
    .unwrap()
});

/// Order status transitions.
/// Labels: status (pending/filled/error/canceled_error), order_dir (entry/exit)
pub static ORDER_STATUS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigexec_order_status_total",
        "Total order status transitions",
        &["status", "order_dir"]
    )
    .unwrap()
});

/// Entries blocked by the news gate.
pub static NEWS_BLOCKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigexec_news_blocked_total",
        "Total entries blocked by the news gate",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Last sized quantity per session.
pub static SIZED_QUANTITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "sigexec_sized_quantity",
        "Last risk-sized order quantity",
        &["symbol", "session"]
    )
    .unwrap()
});

/// Trailing stop moves.
pub static STOP_MOVES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sigexec_stop_moves_total",
        "Total trailing stop-loss moves",
        &["symbol", "pos_side"]
    )
    .unwrap()
});

/// Gateway call latency in milliseconds.
/// Labels: exchange, op (margin/ticker/positions/place_order/stop_loss/candles)
pub static GATEWAY_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sigexec_gateway_latency_ms",
        "Exchange gateway call latency in milliseconds",
        &["exchange", "op", "result"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Position polls needed per verification.
/// Labels: purpose (entry/flatten), result (confirmed/timeout)
pub static VERIFY_POLL_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sigexec_verify_poll_attempts",
        "Position polls per verification",
        &["purpose", "result"],
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 30.0, 50.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a finished tick.
    pub fn tick_finished(exchange: &str, outcome: &str, duration_ms: f64) {
        TICKS_TOTAL.with_label_values(&[exchange, outcome]).inc();
        TICK_DURATION_MS
            .with_label_values(&[exchange])
            .observe(duration_ms);
    }

    /// Record a failed tick.
    pub fn tick_failed(exchange: &str, kind: &str, duration_ms: f64) {
        TICK_ERRORS_TOTAL.with_label_values(&[exchange, kind]).inc();
        TICK_DURATION_MS
            .with_label_values(&[exchange])
            .observe(duration_ms);
    }

    pub fn order_status(status: &str, order_dir: &str) {
        ORDER_STATUS_TOTAL
            .with_label_values(&[status, order_dir])
            .inc();
    }

    /// Record a news-gate block. `reason` is `event` or `source_error`.
    pub fn news_blocked(symbol: &str, reason: &str) {
        NEWS_BLOCKED_TOTAL.with_label_values(&[symbol, reason]).inc();
    }

    pub fn sized_quantity(symbol: &str, session: &str, quantity: f64) {
        SIZED_QUANTITY
            .with_label_values(&[symbol, session])
            .set(quantity);
    }

    pub fn stop_moved(symbol: &str, pos_side: &str) {
        STOP_MOVES_TOTAL.with_label_values(&[symbol, pos_side]).inc();
    }

    pub fn gateway_latency(exchange: &str, op: &str, ok: bool, latency_ms: f64) {
        let result = if ok { "ok" } else { "error" };
        GATEWAY_LATENCY_MS
            .with_label_values(&[exchange, op, result])
            .observe(latency_ms);
    }

    pub fn verify_polls(purpose: &str, confirmed: bool, attempts: u32) {
        let result = if confirmed { "confirmed" } else { "timeout" };
        VERIFY_POLL_ATTEMPTS
            .with_label_values(&[purpose, result])
            .observe(f64::from(attempts));
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_text_includes_recorded_metrics() {
        Metrics::tick_finished("paper-test", "filled", 12.0);
        Metrics::order_status("filled", "entry");
        Metrics::stop_moved("BTCUSDT", "long");
        Metrics::verify_polls("entry", true, 2);

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("sigexec_ticks_total"));
        assert!(text.contains("outcome=\"filled\""));
        assert!(text.contains("sigexec_order_status_total"));
        assert!(text.contains("sigexec_stop_moves_total"));
        assert!(text.contains("sigexec_verify_poll_attempts"));
    }
}
