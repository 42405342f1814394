//! Fixed-scale quantity arithmetic
//!
//! Every inventory quantity in the system is a `Quantity`: a `rust_decimal`
//! value held at exactly six fractional digits. Rounding is applied after
//! every arithmetic step with a single strategy (midpoint away from zero),
//! so two independent computations over the same inputs agree to the last
//! digit. Comparisons that decide whether something "exceeds" a bound use a
//! tolerance of one unit in the last place instead of raw equality.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits every quantity is rounded to
pub const QUANTITY_SCALE: u32 = 6;

const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Tolerance used by all "exceeds" and "is zero" comparisons
const EPSILON: Decimal = dec!(0.000001);

/// Errors raised while building or combining quantities
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("Invalid quantity: {0}")]
    Invalid(String),

    #[error("Overflow during quantity calculation")]
    Overflow,
}

/// A signed inventory quantity rounded to six fractional digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Creates a quantity, rounding to the fixed scale
    pub fn new(value: Decimal) -> Self {
        Self(round(value))
    }

    /// The zero quantity
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Creates a whole-number quantity
    pub fn from_i64(value: i64) -> Self {
        Self::new(Decimal::from(value))
    }

    /// Parses a quantity from its decimal string representation
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::Invalid` if the string is not a decimal number
    pub fn parse(value: &str) -> Result<Self, QuantityError> {
        Decimal::from_str(value.trim())
            .map(Self::new)
            .map_err(|e| QuantityError::Invalid(format!("'{}': {}", value, e)))
    }

    /// Returns the underlying decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True when the magnitude is within the comparison tolerance of zero
    pub fn is_zero(&self) -> bool {
        self.0.abs() < EPSILON
    }

    /// True when the quantity is greater than zero beyond the tolerance
    pub fn is_positive(&self) -> bool {
        self.0 >= EPSILON
    }

    /// True when the quantity is below zero beyond the tolerance
    pub fn is_negative(&self) -> bool {
        self.0 <= -EPSILON
    }

    /// True when `self` is larger than `other` by more than the tolerance
    pub fn exceeds(&self, other: Quantity) -> bool {
        round(self.0 - other.0) > EPSILON
    }

    /// True when the two quantities differ by no more than `tolerance`
    pub fn within(&self, other: Quantity, tolerance: Quantity) -> bool {
        round(self.0 - other.0).abs() <= tolerance.0
    }

    /// Equality with the default comparison tolerance
    pub fn approx_eq(&self, other: Quantity) -> bool {
        !self.exceeds(other) && !other.exceeds(*self)
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Returns `max(0, self)`
    pub fn clamp_non_negative(&self) -> Self {
        if self.0.is_sign_negative() {
            Self::zero()
        } else {
            *self
        }
    }

    /// Multiplies by a factor (e.g. a unit-of-measure conversion) and rounds
    pub fn scale(&self, factor: Decimal) -> Self {
        Self::new(self.0 * factor)
    }

    /// Checked addition
    pub fn checked_add(&self, other: Quantity) -> Result<Quantity, QuantityError> {
        self.0
            .checked_add(other.0)
            .map(Self::new)
            .ok_or(QuantityError::Overflow)
    }

    /// Checked subtraction
    pub fn checked_sub(&self, other: Quantity) -> Result<Quantity, QuantityError> {
        self.0
            .checked_sub(other.0)
            .map(Self::new)
            .ok_or(QuantityError::Overflow)
    }
}

fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, ROUNDING)
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Quantity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.0 + other.0)
    }
}

impl Sub for Quantity {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.0 - other.0)
    }
}

impl Neg for Quantity {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + *q)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn addition_then_subtraction_is_identity(
            a in -1_000_000_000i64..1_000_000_000i64,
            b in -1_000_000_000i64..1_000_000_000i64
        ) {
            let qa = Quantity::new(Decimal::new(a, 3));
            let qb = Quantity::new(Decimal::new(b, 3));
            prop_assert_eq!((qa + qb) - qb, qa);
        }

        #[test]
        fn results_never_carry_more_than_six_places(
            a in -1_000_000_000i64..1_000_000_000i64,
            factor in 1i64..100_000i64
        ) {
            let q = Quantity::new(Decimal::new(a, 4)).scale(Decimal::new(factor, 5));
            prop_assert!(q.as_decimal().scale() <= QUANTITY_SCALE);
        }
    }
}
