//! Fixed-point price representation.
//!
//! A price is `mantissa * 10^exponent`. Keeping prices as scaled integers
//! avoids floating-point rounding in comparisons and on the wire.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Exponent used for every price produced by [`Price::from_decimal`].
pub const PRICE_EXPONENT: i32 = -6;

/// A fixed-point price value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    mantissa: i64,
    exponent: i32,
}

impl Price {
    /// Creates a price from raw mantissa and exponent.
    pub fn new(mantissa: i64, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }

    /// Converts a decimal value into a price with [`PRICE_EXPONENT`]
    /// decimal places of precision.
    pub fn from_decimal(value: f64) -> Self {
        let mantissa = (value * 10f64.powi(-PRICE_EXPONENT)).round() as i64;
        Self {
            mantissa,
            exponent: PRICE_EXPONENT,
        }
    }

    /// Converts back to a decimal value. Display/logging only; persisted
    /// equality must go through [`Price::compare`].
    pub fn to_decimal(self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }

    pub fn mantissa(self) -> i64 {
        self.mantissa
    }

    pub fn exponent(self) -> i32 {
        self.exponent
    }

    pub fn is_zero(self) -> bool {
        self.mantissa == 0
    }

    /// Compares two prices by converting both through a common exponent.
    ///
    /// The narrower exponent is chosen and the other mantissa is scaled up in
    /// 128-bit arithmetic, so prices with different exponents compare by
    /// numeric value rather than by field.
    pub fn compare(self, other: Price) -> Ordering {
        let exponent = self.exponent.min(other.exponent);
        let lhs = scaled(self.mantissa, (self.exponent - exponent) as u32);
        let rhs = scaled(other.mantissa, (other.exponent - exponent) as u32);
        lhs.cmp(&rhs)
    }

    /// True when both prices represent the same numeric value, regardless of
    /// exponent.
    pub fn same_value(self, other: Price) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

fn scaled(mantissa: i64, shift: u32) -> i128 {
    match 10i128
        .checked_pow(shift)
        .and_then(|factor| (mantissa as i128).checked_mul(factor))
    {
        Some(value) => value,
        None if mantissa >= 0 => i128::MAX,
        None => i128::MIN,
    }
}

impl Default for Price {
    fn default() -> Self {
        Self {
            mantissa: 0,
            exponent: PRICE_EXPONENT,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_decimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_decimal_uses_fixed_exponent() {
        let price = Price::from_decimal(100.50);
        assert_eq!(price.exponent(), PRICE_EXPONENT);
        assert_eq!(price.mantissa(), 100_500_000);
        assert!((price.to_decimal() - 100.50).abs() < 1e-9);
    }

    #[test]
    fn compare_normalizes_exponents() {
        let a = Price::new(100_500_000, -6);
        let b = Price::new(10_050, -2);
        assert_eq!(a.compare(b), Ordering::Equal);
        assert!(a.same_value(b));

        let lower = Price::new(100_499_999, -6);
        assert_eq!(lower.compare(b), Ordering::Less);
        assert_eq!(b.compare(lower), Ordering::Greater);
    }

    #[test]
    fn compare_handles_negative_values() {
        let neg = Price::from_decimal(-1.25);
        let pos = Price::from_decimal(1.25);
        assert_eq!(neg.compare(pos), Ordering::Less);
        assert_eq!(neg.compare(neg), Ordering::Equal);
    }

    #[test]
    fn compare_saturates_on_extreme_exponent_spread() {
        let huge = Price::new(i64::MAX, 20);
        let tiny = Price::new(1, -20);
        assert_eq!(huge.compare(tiny), Ordering::Greater);
    }
}
