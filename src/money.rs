//! Exact currency amounts.
//!
//! Prices and totals are fixed-point decimals; nothing on the money path
//! touches `f64`, so repeated additions never drift.

use crate::error::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// A non-negative amount of money in an unspecified currency unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Wraps a decimal amount.
    ///
    /// # Errors
    /// Returns `Err` if the amount is negative.
    pub fn new(amount: Decimal) -> Result<Self, ValidationError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ValidationError::Invalid {
                field: "price",
                reason: "must not be negative",
            });
        }
        Ok(Self(amount.normalize()))
    }

    /// Builds an amount from minor units (cents).
    ///
    /// # Errors
    /// Returns `Err` if `cents` is negative.
    pub fn from_minor(cents: i64) -> Result<Self, ValidationError> {
        Self::new(Decimal::new(cents, 2))
    }

    /// Parses decimal text such as `"10.10"`.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let amount = Decimal::from_str(text.trim()).map_err(|_| ValidationError::Invalid {
            field: "price",
            reason: "not a decimal number",
        })?;
        Self::new(amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Line total for `quantity` units at this price.
    pub fn times(self, quantity: u32) -> Money {
        Money(self.0 * Decimal::from(quantity))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = ValidationError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Decimal {
        money.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(text: &str) -> Money {
        Money::parse(text).unwrap()
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(Money::parse("-0.01").is_err());
        assert!(Money::from_minor(-1).is_err());
        assert!(Money::parse("0").unwrap().is_zero());
    }

    #[test]
    fn repeated_cent_additions_do_not_drift() {
        let ten_cents = money("0.10");
        let total: Money = std::iter::repeat(ten_cents).take(3).sum();
        assert_eq!(total, money("0.30"));

        let mut running = Money::ZERO;
        for _ in 0..1000 {
            running += money("0.01");
        }
        assert_eq!(running, money("10.00"));
    }

    #[test]
    fn times_multiplies_exactly() {
        assert_eq!(money("10.10").times(3), money("30.30"));
        assert_eq!(money("20.20").times(3), money("60.60"));
        assert_eq!(money("19.99").times(0), Money::ZERO);
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(money("181.8").to_string(), "181.80");
        assert_eq!(money("250").to_string(), "250.00");
        assert_eq!(Money::from_minor(2075).unwrap().to_string(), "20.75");
    }

    #[test]
    fn equal_amounts_compare_equal_regardless_of_scale() {
        assert_eq!(money("1.50"), money("1.5"));
        assert_eq!(money("200"), money("200.00"));
    }

    #[test]
    fn serde_accepts_strings_and_numbers() {
        let from_str: Money = serde_json::from_str("\"10.10\"").unwrap();
        let from_num: Money = serde_json::from_str("10.1").unwrap();
        assert_eq!(from_str, from_num);

        let negative = serde_json::from_str::<Money>("\"-3\"");
        assert!(negative.is_err());

        let encoded = serde_json::to_string(&money("42.5")).unwrap();
        assert_eq!(encoded, "\"42.5\"");
    }
}
