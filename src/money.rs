// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Exact currency amounts.
//!
//! [`Money`] is a [`Decimal`] pinned to two fractional digits. Values are parsed from
//! fixed-point strings only (no exponents, no signs other than a leading `-`) and always
//! format with exactly two decimals.
//!
//! # Example
//!
//! ```
//! use balance_ledger::Money;
//!
//! let balance: Money = "100".parse().unwrap();
//! let win = Money::parse_amount("25.5").unwrap();
//! assert_eq!(balance.checked_add(win).unwrap().to_string(), "125.50");
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a string is not a valid amount.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    #[error("amount is empty")]
    Empty,

    #[error("'{0}' is not a fixed-point decimal")]
    NotNumeric(String),

    #[error("'{0}' has more than 2 fractional digits")]
    TooPrecise(String),

    #[error("'{0}' exceeds 13 integer digits")]
    OutOfRange(String),

    /// Amount parsed but is zero or negative
    #[error("'{0}' must be greater than zero")]
    NotPositive(String),

    #[error("'{0}' must not be negative")]
    Negative(String),
}

/// A scale-2 exact decimal amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    pub const SCALE: u32 = 2;
    /// Integer digits allowed by the persisted `DECIMAL(15,2)` shape.
    pub const MAX_INTEGER_DIGITS: usize = 13;
    pub const ZERO: Money = Money(dec!(0.00));
    /// Largest value the persisted shape can hold.
    pub const MAX: Money = Money(dec!(9999999999999.99));

    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, Self::SCALE))
    }

    /// Parses a transaction amount, which must be strictly positive.
    pub fn parse_amount(text: &str) -> Result<Money, ParseMoneyError> {
        let amount: Money = text.parse()?;
        if !amount.is_positive() {
            return Err(ParseMoneyError::NotPositive(text.to_string()));
        }
        Ok(amount)
    }

    /// Parses a balance, which may be zero but never negative.
    pub fn parse_balance(text: &str) -> Result<Money, ParseMoneyError> {
        let balance: Money = text.parse()?;
        if balance.is_negative() {
            return Err(ParseMoneyError::Negative(text.to_string()));
        }
        Ok(balance)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Adds, returning `None` above [`Money::MAX`].
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .filter(|sum| *sum <= Self::MAX)
    }

    /// Subtracts without any floor; callers decide whether a negative result is allowed.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(ParseMoneyError::Empty);
        }

        let unsigned = text.strip_prefix('-').unwrap_or(text);
        let (integer, fraction) = match unsigned.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (unsigned, None),
        };

        let is_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !is_digits(integer) || fraction.is_some_and(|f| !is_digits(f)) {
            return Err(ParseMoneyError::NotNumeric(text.to_string()));
        }
        if fraction.map_or(0, str::len) > Self::SCALE as usize {
            return Err(ParseMoneyError::TooPrecise(text.to_string()));
        }
        if integer.trim_start_matches('0').len() > Self::MAX_INTEGER_DIGITS {
            return Err(ParseMoneyError::OutOfRange(text.to_string()));
        }

        let mut value =
            Decimal::from_str(text).map_err(|_| ParseMoneyError::NotNumeric(text.to_string()))?;
        if value.is_zero() {
            // "-0.00" is plain zero
            value.set_sign_positive(true);
        }
        value.rescale(Self::SCALE);
        Ok(Money(value))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}
