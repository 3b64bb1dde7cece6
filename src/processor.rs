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

//! Transaction processing.
//!
//! The [`Processor`] validates raw requests with [`TransactionRequest::validate`] and
//! hands them to a [`LedgerStore`] as a single atomic apply. It never touches the store
//! until every field is valid.
//!
//! # Validation order
//!
//! The first failure wins:
//!
//! | Step | Check | Error |
//! |------|-------|-------|
//! | 1 | source type is `game`, `server` or `payment` | [`TransactionError::InvalidSourceType`] |
//! | 2 | amount is a positive fixed-point decimal | [`TransactionError::InvalidAmount`] |
//! | 3 | state is `win` or `lose` | [`TransactionError::InvalidTransactionState`] |
//! | 4 | transaction id is not blank | [`TransactionError::MissingField`] |

use crate::account::User;
use crate::base::{ExternalId, RecordId, UserId};
use crate::error::TransactionError;
use crate::money::Money;
use crate::store::{ApplyOutcome, LedgerStore};
use crate::transaction::{TransactionRecord, TransactionRequest};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, instrument};

/// Confirmation of an applied transaction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub status: &'static str,
    pub message: &'static str,
    pub user_id: UserId,
    pub transaction_id: ExternalId,
    pub record_id: RecordId,
    /// Balance right after this transaction.
    pub balance: Money,
}

impl Receipt {
    fn applied(record: &TransactionRecord, balance: Money) -> Self {
        Self {
            status: "success",
            message: "Transaction processed successfully",
            user_id: record.user_id,
            transaction_id: record.external_id.clone(),
            record_id: record.id,
            balance,
        }
    }
}

/// A user's committed balance.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Money,
}

/// Validates requests and applies them to a [`LedgerStore`].
#[derive(Debug)]
pub struct Processor<S> {
    store: S,
}

impl<S: LedgerStore> Processor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Applies `request` for `user_id` at most once per transaction id.
    ///
    /// # Errors
    ///
    /// - Validation errors, see the module docs. The store is not called.
    /// - [`TransactionError::UserNotFound`] - no such user.
    /// - [`TransactionError::AlreadyApplied`] - the transaction id was applied before.
    /// - [`TransactionError::InsufficientFunds`] - a loss exceeds the balance.
    /// - [`TransactionError::Transient`] - retry budget exhausted; safe to resubmit.
    pub fn process(
        &self,
        user_id: UserId,
        source_type: &str,
        request: &TransactionRequest,
    ) -> Result<Receipt, TransactionError> {
        self.process_until(user_id, source_type, request, None)
    }

    /// Like [`Processor::process`], giving up with `Transient` once `deadline` passes.
    #[instrument(
        skip(self, request, deadline),
        fields(transaction_id = %request.transaction_id)
    )]
    pub fn process_until(
        &self,
        user_id: UserId,
        source_type: &str,
        request: &TransactionRequest,
        deadline: Option<Instant>,
    ) -> Result<Receipt, TransactionError> {
        let tx = request.validate(user_id, source_type).inspect_err(|e| {
            debug!(error = %e, "rejected invalid request");
        })?;

        let result = match self.store.apply_transaction(&tx, deadline) {
            ApplyOutcome::Applied { record, balance } => Ok(Receipt::applied(&record, balance)),
            ApplyOutcome::AlreadyApplied => Err(TransactionError::AlreadyApplied(tx.external_id)),
            ApplyOutcome::InsufficientFunds { balance } => {
                Err(TransactionError::InsufficientFunds {
                    balance,
                    requested: tx.amount,
                })
            }
            ApplyOutcome::BalanceLimitExceeded { balance } => {
                Err(TransactionError::BalanceLimitExceeded {
                    balance,
                    requested: tx.amount,
                })
            }
            ApplyOutcome::UserNotFound => Err(TransactionError::UserNotFound(user_id)),
            ApplyOutcome::Transient(reason) => Err(TransactionError::Transient(reason)),
        };

        match &result {
            Ok(receipt) => debug!(record_id = %receipt.record_id, balance = %receipt.balance, "applied"),
            Err(e) => debug!(code = e.code(), "not applied"),
        }
        result
    }

    /// Last committed balance of `user_id`.
    #[instrument(level = "debug", skip(self))]
    pub fn balance(&self, user_id: UserId) -> Result<BalanceView, TransactionError> {
        let balance = self.store.get_balance(user_id)?;
        Ok(BalanceView { user_id, balance })
    }

    pub fn user(&self, user_id: UserId) -> Result<User, TransactionError> {
        self.store.user(user_id)
    }

    /// Committed transactions of `user_id`, newest first.
    pub fn transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, TransactionError> {
        self.store.transactions(user_id)
    }
}
