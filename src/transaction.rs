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

//! Transaction model.
//!
//! A submitted transaction moves through:
//!
//! ```text
//! Received ──validate──► Validated ──apply──► Applied
//!                                       ├───► Duplicate (external id already applied)
//!                                       ├───► InsufficientFunds
//!                                       └───► UserNotFound
//! ```
//!
//! Every right-hand state is terminal. Resubmitting an applied external id always lands
//! on `Duplicate`.

use crate::base::{ExternalId, RecordId, UserId};
use crate::error::TransactionError;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a balance movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Win,
    Lose,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Lose => "lose",
        }
    }

    /// Computes the balance after applying `amount` in this direction.
    pub fn apply(&self, balance: Money, amount: Money) -> Result<Money, BalanceRejection> {
        match self {
            Self::Win => balance
                .checked_add(amount)
                .ok_or(BalanceRejection::LimitExceeded),
            Self::Lose => balance
                .checked_sub(amount)
                .filter(|b| !b.is_negative())
                .ok_or(BalanceRejection::InsufficientFunds),
        }
    }
}

/// Why [`TransactionState::apply`] refused to move a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceRejection {
    /// A loss would leave the balance negative.
    InsufficientFunds,
    /// A win would push the balance above [`Money::MAX`].
    LimitExceeded,
}

impl FromStr for TransactionState {
    type Err = TransactionError;

    /// Matching is exact: `"WIN"` is not a state.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "win" => Ok(Self::Win),
            "lose" => Ok(Self::Lose),
            other => Err(TransactionError::InvalidTransactionState(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a transaction, supplied by the caller out of band (the `Source-Type` header).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Game,
    Server,
    Payment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Server => "server",
            Self::Payment => "payment",
        }
    }
}

impl FromStr for SourceType {
    type Err = TransactionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "game" => Ok(Self::Game),
            "server" => Ok(Self::Server),
            "payment" => Ok(Self::Payment),
            other => Err(TransactionError::InvalidSourceType(other.to_string())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw request body as received from a client.
///
/// Fields are unvalidated text; the processor turns this into a [`NewTransaction`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub transaction_id: String,
}

impl TransactionRequest {
    pub fn new(
        state: impl Into<String>,
        amount: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            state: state.into(),
            amount: amount.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Turns this request into a [`NewTransaction`] for `user_id`.
    ///
    /// Checks run in a fixed order and the first failure wins: source type, amount,
    /// state, then a non-blank transaction id.
    pub fn validate(
        &self,
        user_id: UserId,
        source_type: &str,
    ) -> Result<NewTransaction, TransactionError> {
        let source_type: SourceType = source_type.parse()?;
        let amount = Money::parse_amount(&self.amount)?;
        let state: TransactionState = self.state.parse()?;

        let external_id = ExternalId::new(self.transaction_id.as_str());
        if external_id.is_blank() {
            return Err(TransactionError::MissingField("transactionId"));
        }

        Ok(NewTransaction {
            user_id,
            external_id,
            state,
            amount,
            source_type,
        })
    }
}

/// A validated transaction, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub external_id: ExternalId,
    pub state: TransactionState,
    pub amount: Money,
    pub source_type: SourceType,
}

/// A committed transaction. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: RecordId,
    pub user_id: UserId,
    #[serde(rename = "transactionId")]
    pub external_id: ExternalId,
    pub state: TransactionState,
    pub amount: Money,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
}
