use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Not a monetary amount: '{0}'")]
pub struct AmountParseError(pub String);

/// A currency-agnostic monetary amount, always held at two decimal places.
///
/// Serialized as a JSON number so API clients receive `42.5`, not `"42.50"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(#[serde(with = "rust_decimal::serde::float")] Decimal);

impl Amount {
    pub fn from_decimal(decimal: Decimal) -> Self {
        Amount(decimal.round_dp(2))
    }

    pub fn from_cents(cents: i64) -> Self {
        Amount(Decimal::new(cents, 2))
    }

    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    /// `None` when the sum leaves the representable range.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Parse an amount token as it appears on a receipt: `42.50`, `1,234.56`.
    /// Thousands separators are dropped; anything else non-numeric is rejected.
    pub fn parse_receipt_token(token: &str) -> Result<Self, AmountParseError> {
        let clean: String = token.trim().chars().filter(|c| *c != ',').collect();
        Decimal::from_str(&clean)
            .map(Amount::from_decimal)
            .map_err(|_| AmountParseError(token.to_string()))
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse_receipt_token(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Amount(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |a, b| a + b)
    }
}
