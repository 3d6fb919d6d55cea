//! Precision-safe decimal types for order sizing and stop prices.
//!
//! All quantities and prices flow through `rust_decimal` so that sizing,
//! lot rounding and stop comparisons are exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Mul;
use std::str::FromStr;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` so a stop price can never be confused with a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Shift this price by a signed percentage (`-2` means 2% lower).
    #[inline]
    pub fn offset_pct(&self, pct: Decimal) -> Self {
        Self(self.0 * (ONE_HUNDRED + pct) / ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

/// Order or position quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Absolute quantity (exchanges report short size as negative in one-way mode).
    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Round down to the exchange quantity step.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        if lot_size.is_zero() {
            return *self;
        }
        Self((self.0 / lot_size.0).floor() * lot_size.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

/// Take `percent` of `value`, clamping the percentage into `[1, 100]`.
///
/// Below 1 the allocation collapses to 1%; above 100 it saturates at the
/// whole value.
pub fn percent_of_float(value: Decimal, percent: Decimal) -> Decimal {
    if percent < Decimal::ONE {
        return value * Decimal::new(1, 2);
    }
    if percent > ONE_HUNDRED {
        return value;
    }
    value * percent / ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percent_of_float_clamps_low() {
        assert_eq!(percent_of_float(dec!(200), dec!(0.5)), dec!(2));
        assert_eq!(percent_of_float(dec!(200), dec!(-10)), dec!(2));
    }

    #[test]
    fn test_percent_of_float_clamps_high() {
        assert_eq!(percent_of_float(dec!(200), dec!(150)), dec!(200));
    }

    #[test]
    fn test_percent_of_float_in_range() {
        assert_eq!(percent_of_float(dec!(200), dec!(1)), dec!(2));
        assert_eq!(percent_of_float(dec!(200), dec!(25)), dec!(50));
        assert_eq!(percent_of_float(dec!(200), dec!(100)), dec!(200));
    }

    #[test]
    fn test_price_offset_pct() {
        let entry = Price::new(dec!(100));
        assert_eq!(entry.offset_pct(dec!(-2)), Price::new(dec!(98)));
        assert_eq!(entry.offset_pct(dec!(1.5)), Price::new(dec!(101.5)));
    }

    #[test]
    fn test_size_round_to_lot() {
        let size = Size::new(dec!(1.2345));
        assert_eq!(size.round_to_lot(Size::new(dec!(0.001))).0, dec!(1.234));
        assert_eq!(size.round_to_lot(Size::ZERO), size);
    }
}
