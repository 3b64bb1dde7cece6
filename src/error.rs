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

//! Error types for transaction processing and journal recovery.

use crate::base::{ExternalId, UserId};
use crate::money::{Money, ParseMoneyError};
use thiserror::Error;

/// Transaction processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Amount is not a positive fixed-point value
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] ParseMoneyError),

    /// State is neither `win` nor `lose`
    #[error("invalid transaction state '{0}', must be 'win' or 'lose'")]
    InvalidTransactionState(String),

    /// Source type is not one of `game`, `server`, `payment`
    #[error("invalid source type '{0}', must be one of: game, server, payment")]
    InvalidSourceType(String),

    /// A required field is empty
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The external id was applied before; the submission had no effect
    #[error("transaction '{0}' already processed")]
    AlreadyApplied(ExternalId),

    /// A loss would leave the balance negative
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Money, requested: Money },

    /// A win would push the balance above the largest storable value
    #[error("balance limit exceeded: balance {balance}, requested {requested}, limit {}", Money::MAX)]
    BalanceLimitExceeded { balance: Money, requested: Money },

    /// Lock conflict outlived the retry budget or the deadline, or storage is unavailable
    #[error("temporarily unable to apply transaction: {0}")]
    Transient(String),
}

/// Closed classification of [`TransactionError`], free of context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    InvalidTransactionState,
    InvalidSourceType,
    MissingField,
    UserNotFound,
    AlreadyApplied,
    InsufficientFunds,
    BalanceLimitExceeded,
    Transient,
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InvalidTransactionState(_) => ErrorKind::InvalidTransactionState,
            Self::InvalidSourceType(_) => ErrorKind::InvalidSourceType,
            Self::MissingField(_) => ErrorKind::MissingField,
            Self::UserNotFound(_) => ErrorKind::UserNotFound,
            Self::AlreadyApplied(_) => ErrorKind::AlreadyApplied,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::BalanceLimitExceeded { .. } => ErrorKind::BalanceLimitExceeded,
            Self::Transient(_) => ErrorKind::Transient,
        }
    }

    /// Only transient failures may be retried with the same external id.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Stable machine readable code for responses.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidTransactionState => "INVALID_TRANSACTION_STATE",
            Self::InvalidSourceType => "INVALID_SOURCE_TYPE",
            Self::MissingField => "MISSING_FIELD",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::AlreadyApplied => "TRANSACTION_ALREADY_PROCESSED",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::BalanceLimitExceeded => "BALANCE_LIMIT_EXCEEDED",
            Self::Transient => "TRANSIENT_FAILURE",
        }
    }
}

/// Errors raised while opening or replaying the journal.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal format error: {0}")]
    Csv(#[from] csv::Error),

    #[error("corrupt journal row at line {line}: {reason}")]
    Corrupt { line: u64, reason: String },
}
