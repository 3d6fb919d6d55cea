//! Controller and account configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sigexec_core::Size;
use sigexec_position::DEFAULT_LOOKBACK;
use sigexec_risk::RiskSizingConfig;

use crate::error::{ControllerError, ControllerResult};

/// Tick timing and bounded-call settings shared by every account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Tick interval (seconds). Default: 60.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Deadline for each gateway or store call (ms). Default: 10,000.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Sleep between position polls while verifying (ms). Default: 500.
    #[serde(default = "default_verify_poll_interval_ms")]
    pub verify_poll_interval_ms: u64,
    /// Hard wall-clock deadline for one verification (ms). Default: 15,000.
    #[serde(default = "default_verify_deadline_ms")]
    pub verify_deadline_ms: u64,
    /// A `pending` entry older than this with no position is marked `error`
    /// (seconds). Default: 300.
    #[serde(default = "default_stale_pending_after_secs")]
    pub stale_pending_after_secs: u64,
    /// Attempts to attach the initial stop. Default: 3.
    #[serde(default = "default_stop_attach_attempts")]
    pub stop_attach_attempts: u32,
    /// Linear backoff step between stop attach attempts (ms). Default: 1,000.
    #[serde(default = "default_stop_attach_backoff_ms")]
    pub stop_attach_backoff_ms: u64,
    /// Kline interval passed to the gateway (exchange notation). Default: "15".
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Trailing lookback in bars. Default: 20.
    #[serde(default = "default_candle_lookback")]
    pub candle_lookback: i64,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_verify_poll_interval_ms() -> u64 {
    500
}

fn default_verify_deadline_ms() -> u64 {
    15_000
}

fn default_stale_pending_after_secs() -> u64 {
    300
}

fn default_stop_attach_attempts() -> u32 {
    3
}

fn default_stop_attach_backoff_ms() -> u64 {
    1_000
}

fn default_candle_interval() -> String {
    "15".to_string()
}

fn default_candle_lookback() -> i64 {
    DEFAULT_LOOKBACK
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            call_timeout_ms: default_call_timeout_ms(),
            verify_poll_interval_ms: default_verify_poll_interval_ms(),
            verify_deadline_ms: default_verify_deadline_ms(),
            stale_pending_after_secs: default_stale_pending_after_secs(),
            stop_attach_attempts: default_stop_attach_attempts(),
            stop_attach_backoff_ms: default_stop_attach_backoff_ms(),
            candle_interval: default_candle_interval(),
            candle_lookback: default_candle_lookback(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> ControllerResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(ControllerError::Config(
                "tick_interval_secs must be > 0".to_string(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ControllerError::Config(
                "call_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.verify_poll_interval_ms == 0 {
            return Err(ControllerError::Config(
                "verify_poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.stop_attach_attempts == 0 {
            return Err(ControllerError::Config(
                "stop_attach_attempts must be >= 1".to_string(),
            ));
        }
        if self.candle_interval.trim().is_empty() {
            return Err(ControllerError::Config(
                "candle_interval must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn verify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.verify_poll_interval_ms)
    }

    pub fn verify_deadline(&self) -> Duration {
        Duration::from_millis(self.verify_deadline_ms)
    }

    pub fn stale_pending_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_pending_after_secs).unwrap_or(i64::MAX))
    }

    /// Backoff before stop attach attempt `attempt + 1`.
    pub fn stop_attach_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.stop_attach_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Bars to request for trailing. Never fewer than two.
    pub fn candle_limit(&self) -> usize {
        let lookback = if self.candle_lookback <= 0 {
            DEFAULT_LOOKBACK
        } else {
            self.candle_lookback
        };
        usize::try_from(lookback).unwrap_or(DEFAULT_LOOKBACK as usize).max(2)
    }
}

/// Per-account trading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub user_id: String,
    /// Signal symbol as written by the generator (e.g. "BTCUSD").
    pub symbol: String,
    /// Exchange name the generator tags its signals with.
    pub exchange_name: String,
    /// Share of available margin to allocate, clamped to [1, 100]. Default: 10.
    #[serde(default = "default_percent_of_balance")]
    pub percent_of_balance: Decimal,
    /// Default: 1.
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
    /// Protective stop distance in percent of entry. Zero disables stops.
    /// Default: 2.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Exchange lot size. Default: 0.001.
    #[serde(default = "default_qty_step")]
    pub qty_step: Decimal,
    #[serde(default)]
    pub risk: RiskSizingConfig,
}

fn default_percent_of_balance() -> Decimal {
    Decimal::TEN
}

fn default_leverage() -> Decimal {
    Decimal::ONE
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::TWO
}

fn default_qty_step() -> Decimal {
    Decimal::new(1, 3)
}

impl AccountSettings {
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        exchange_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: symbol.into(),
            exchange_name: exchange_name.into(),
            percent_of_balance: default_percent_of_balance(),
            leverage: default_leverage(),
            stop_loss_pct: default_stop_loss_pct(),
            qty_step: default_qty_step(),
            risk: RiskSizingConfig::default(),
        }
    }

    pub fn qty_step(&self) -> Size {
        Size::new(self.qty_step)
    }

    pub fn validate(&self) -> ControllerResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(ControllerError::Config("user_id must not be empty".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(ControllerError::Config(format!(
                "account {}: symbol must not be empty",
                self.user_id
            )));
        }
        if self.leverage <= Decimal::ZERO {
            return Err(ControllerError::Config(format!(
                "account {}: leverage must be positive",
                self.user_id
            )));
        }
        if self.qty_step <= Decimal::ZERO {
            return Err(ControllerError::Config(format!(
                "account {}: qty_step must be positive",
                self.user_id
            )));
        }
        if self.stop_loss_pct < Decimal::ZERO {
            return Err(ControllerError::Config(format!(
                "account {}: stop_loss_pct must not be negative",
                self.user_id
            )));
        }
        self.risk
            .validate()
            .map_err(|e| ControllerError::Config(format!("account {}: {e}", self.user_id)))
    }
}
