//! Session-based position sizing.
//!
//! `RiskSizer::size` is a pure function of `(base quantity, now, config)`:
//! it classifies `now` into a [`RiskSession`], looks up the per-user
//! multiplier and scales the base quantity. A disabled session or a zero
//! multiplier resolves to `NoTrade` with quantity zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sigexec_core::{percent_of_float, Price, Size};
use tracing::debug;

use crate::error::{RiskError, RiskResult};
use crate::session::{RiskSession, SessionSchedule};

/// Per-user session multipliers. Unset entries default to 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMultipliers {
    #[serde(default)]
    pub us: Option<Decimal>,
    #[serde(default)]
    pub london: Option<Decimal>,
    #[serde(default)]
    pub asia: Option<Decimal>,
    #[serde(default)]
    pub dead_zone: Option<Decimal>,
    #[serde(default)]
    pub weekend_holiday: Option<Decimal>,
    #[serde(default)]
    pub default: Option<Decimal>,
}

impl SessionMultipliers {
    /// Multiplier for a classified session.
    #[must_use]
    pub fn for_session(&self, session: RiskSession) -> Decimal {
        let configured = match session {
            RiskSession::US => self.us,
            RiskSession::London => self.london,
            RiskSession::Asia => self.asia,
            RiskSession::DeadZone => self.dead_zone,
            RiskSession::Weekend => self.weekend_holiday,
            RiskSession::Default => self.default,
            RiskSession::NoTrade => return Decimal::ZERO,
        };
        configured.unwrap_or(Decimal::ONE)
    }

    fn validate(&self) -> RiskResult<()> {
        let entries = [
            ("us", self.us),
            ("london", self.london),
            ("asia", self.asia),
            ("dead_zone", self.dead_zone),
            ("weekend_holiday", self.weekend_holiday),
            ("default", self.default),
        ];
        for (name, value) in entries {
            if value.is_some_and(|m| m.is_sign_negative() && !m.is_zero()) {
                return Err(RiskError::ConfigError(format!(
                    "multiplier {name} must not be negative"
                )));
            }
        }
        Ok(())
    }
}

/// Sizing configuration for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSizingConfig {
    #[serde(default)]
    pub multipliers: SessionMultipliers,
    /// Sessions the operator has switched off entirely.
    #[serde(default)]
    pub disabled_sessions: Vec<RiskSession>,
    #[serde(default)]
    pub schedule: SessionSchedule,
}

impl RiskSizingConfig {
    pub fn validate(&self) -> RiskResult<()> {
        self.multipliers.validate()?;
        self.schedule.validate()
    }
}

/// Result of sizing one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingDecision {
    /// Adjusted quantity; zero when `session` is `NoTrade`.
    pub quantity: Size,
    /// Effective session (`NoTrade` when trading is switched off).
    pub session: RiskSession,
    /// Session the clock fell into before the disabled/multiplier check.
    pub classified: RiskSession,
    pub multiplier: Decimal,
}

impl SizingDecision {
    #[must_use]
    pub fn is_no_trade(&self) -> bool {
        self.session == RiskSession::NoTrade || !self.quantity.is_positive()
    }
}

/// Session-aware sizer.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: RiskSizingConfig,
    qty_step: Size,
}

impl RiskSizer {
    pub fn new(config: RiskSizingConfig, qty_step: Size) -> Self {
        Self { config, qty_step }
    }

    pub fn config(&self) -> &RiskSizingConfig {
        &self.config
    }

    /// Scale `base_qty` by the multiplier of the session active at `now`.
    #[must_use]
    pub fn size(&self, base_qty: Size, now: DateTime<Utc>) -> SizingDecision {
        let classified = self.config.schedule.classify(now);

        if self.config.disabled_sessions.contains(&classified) {
            debug!(session = %classified, "Session disabled, sizing to zero");
            return SizingDecision {
                quantity: Size::ZERO,
                session: RiskSession::NoTrade,
                classified,
                multiplier: Decimal::ZERO,
            };
        }

        let multiplier = self.config.multipliers.for_session(classified);
        if multiplier.is_zero() {
            debug!(session = %classified, "Session multiplier is zero, sizing to zero");
            return SizingDecision {
                quantity: Size::ZERO,
                session: RiskSession::NoTrade,
                classified,
                multiplier,
            };
        }

        let quantity = (base_qty * multiplier).round_to_lot(self.qty_step);
        SizingDecision {
            quantity,
            session: classified,
            classified,
            multiplier,
        }
    }
}

/// Base order quantity before the session multiplier.
///
/// `percent_of_float(margin, percent) * leverage / price`, rounded down to
/// `qty_step`.
pub fn base_quantity(
    available_margin: Decimal,
    percent: Decimal,
    leverage: Decimal,
    price: Price,
    qty_step: Size,
) -> RiskResult<Size> {
    if !price.is_positive() {
        return Err(RiskError::InvalidInput(format!(
            "price must be positive, got {price}"
        )));
    }
    if leverage <= Decimal::ZERO {
        return Err(RiskError::InvalidInput(format!(
            "leverage must be positive, got {leverage}"
        )));
    }
    if available_margin <= Decimal::ZERO {
        return Ok(Size::ZERO);
    }

    let notional = percent_of_float(available_margin, percent) * leverage;
    Ok(Size::new(notional / price.inner()).round_to_lot(qty_step))
}
