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

//! Ledger storage.
//!
//! [`LedgerStore`] owns users and transactions and exposes one atomic write,
//! [`LedgerStore::apply_transaction`]. [`MemoryStore`] implements it over an arena of
//! independently locked user rows, an index of claimed external ids and an optional
//! [`Journal`] for durability.
//!
//! # Atomic unit
//!
//! For one `apply_transaction` call the store:
//!
//! 1. locates the user row (`UserNotFound` if absent);
//! 2. locks the row, waiting at most the policy's lock timeout;
//! 3. returns `AlreadyApplied` if the external id is claimed;
//! 4. computes the new balance, returning `InsufficientFunds` if a loss goes negative;
//! 5. claims the external id, appends to the journal and commits the balance and the
//!    record while the claim's index shard is still held.
//!
//! Steps 3–5 run under the row lock, so writers to one user are serialised and writers
//! to different users proceed in parallel. Lock order is always row → index shard →
//! journal. A lock timeout retries the whole unit with backoff and finally surfaces as
//! `Transient`.

use crate::account::{User, UserAccount, UserData};
use crate::base::{RecordId, UserId};
use crate::error::{JournalError, TransactionError};
use crate::idempotency::{Claim, IdempotencyIndex};
use crate::journal::{Journal, JournalEntry};
use crate::money::{Money, ParseMoneyError};
use crate::retry::{Conflict, RetryPolicy};
use crate::transaction::{BalanceRejection, NewTransaction, TransactionRecord};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Result of [`LedgerStore::apply_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Committed; `balance` is the balance after this transaction.
    Applied {
        record: TransactionRecord,
        balance: Money,
    },
    /// The external id was applied before. Nothing changed.
    AlreadyApplied,
    /// A loss exceeded `balance`. Nothing changed.
    InsufficientFunds { balance: Money },
    /// A win would take `balance` above [`Money::MAX`]. Nothing changed.
    BalanceLimitExceeded { balance: Money },
    UserNotFound,
    /// Nothing changed; the same request may be retried.
    Transient(String),
}

/// Durable users and transactions with an atomic apply operation.
pub trait LedgerStore: Send + Sync {
    /// Last committed balance of `user_id`.
    fn get_balance(&self, user_id: UserId) -> Result<Money, TransactionError>;

    fn user(&self, user_id: UserId) -> Result<User, TransactionError>;

    /// Applies `tx` at most once per external id. See the module docs for the steps.
    ///
    /// If `deadline` passes before the unit commits, returns `Transient` with no effect.
    /// The deadline bounds row-lock waits and backoff sleeps. Once the row is locked and
    /// the deadline has not passed, the unit runs to the end: waits on the external-id
    /// index and the journal write are not cut short.
    fn apply_transaction(&self, tx: &NewTransaction, deadline: Option<Instant>) -> ApplyOutcome;

    /// Committed transactions of `user_id`, newest first.
    fn transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, TransactionError>;

    /// Creates `user_id` with `balance` unless it exists. Returns whether it was created.
    fn seed_user(&self, user_id: UserId, balance: Money) -> Result<bool, TransactionError>;

    /// Creates a user with the next id from the user sequence.
    fn create_user(&self, balance: Money) -> Result<UserId, TransactionError>;
}

/// In-memory ledger, optionally backed by a journal file.
#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<UserId, Arc<UserAccount>>,
    keys: IdempotencyIndex,
    journal: Option<Journal>,
    retry: RetryPolicy,
    next_user_id: AtomicU64,
    next_record_id: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, non-durable store with the default retry policy.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(retry: RetryPolicy) -> Self {
        Self {
            users: DashMap::new(),
            keys: IdempotencyIndex::new(),
            journal: None,
            retry,
            next_user_id: AtomicU64::new(1),
            next_record_id: AtomicU64::new(1),
        }
    }

    /// Opens a durable store, replaying the journal at `path` (created if missing).
    ///
    /// # Errors
    ///
    /// - [`JournalError::Io`] / [`JournalError::Csv`] - the file cannot be read or opened.
    /// - [`JournalError::Corrupt`] - a row is malformed, references an unknown user,
    ///   repeats an external id, or would drive a balance negative.
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self, JournalError> {
        let (journal, entries) = Journal::open(path)?;
        Self::with_journal(journal, entries, retry)
    }

    /// Replays `entries` and keeps appending to `journal`.
    pub(crate) fn with_journal(
        journal: Journal,
        entries: Vec<(u64, JournalEntry)>,
        retry: RetryPolicy,
    ) -> Result<Self, JournalError> {
        let store = Self::with_policy(retry);
        let replayed = entries.len();
        store.replay(entries)?;
        info!(
            path = %journal.path().display(),
            entries = replayed,
            users = store.users.len(),
            "journal replayed"
        );
        Ok(Self {
            journal: Some(journal),
            ..store
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn account(&self, user_id: UserId) -> Option<Arc<UserAccount>> {
        // Clone out of the map so no shard guard is held while locking the row.
        self.users.get(&user_id).map(|entry| Arc::clone(entry.value()))
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), TransactionError> {
        match &self.journal {
            Some(journal) => journal.append(entry).map_err(|e| {
                warn!(error = %e, "journal append failed");
                TransactionError::Transient(format!("storage unavailable: {e}"))
            }),
            None => Ok(()),
        }
    }

    fn replay(&self, entries: Vec<(u64, JournalEntry)>) -> Result<(), JournalError> {
        for (line, entry) in entries {
            let corrupt = |reason: String| JournalError::Corrupt { line, reason };

            match entry {
                JournalEntry::User {
                    id,
                    balance,
                    created_at,
                } => {
                    if balance.is_negative() || balance > Money::MAX {
                        return Err(corrupt(format!("user {id} has out of range balance {balance}")));
                    }
                    match self.users.entry(id) {
                        Entry::Occupied(_) => {
                            return Err(corrupt(format!("user {id} created twice")));
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(Arc::new(UserAccount::new(id, balance, created_at)));
                        }
                    }
                    self.next_user_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                }
                JournalEntry::Transaction(record) => {
                    let account = self
                        .account(record.user_id)
                        .ok_or_else(|| corrupt(format!("unknown user {}", record.user_id)))?;
                    if !record.amount.is_positive() {
                        return Err(corrupt(format!("non-positive amount {}", record.amount)));
                    }

                    let mut data = account.lock();
                    let balance = record.state.apply(data.balance, record.amount).map_err(|e| {
                        corrupt(format!(
                            "{} of {} from balance {} rejected: {e:?}",
                            record.state, record.amount, data.balance
                        ))
                    })?;
                    if !self.keys.restore(record.external_id.clone(), record.id) {
                        return Err(corrupt(format!(
                            "external id '{}' applied twice",
                            record.external_id
                        )));
                    }
                    self.next_record_id.fetch_max(record.id.0 + 1, Ordering::SeqCst);
                    account.commit(&mut data, record, balance);
                }
            }
        }
        Ok(())
    }

    /// One try at the atomic unit. `Err(Conflict)` means the row lock was not acquired.
    fn attempt(
        &self,
        account: &UserAccount,
        tx: &NewTransaction,
        wait: Duration,
        deadline: Option<Instant>,
    ) -> Result<ApplyOutcome, Conflict> {
        let Some(mut data) = account.try_lock_for(wait) else {
            debug!(?wait, "row lock busy");
            return Err(Conflict);
        };

        // Past this point nothing waits on the deadline, so do not start once it is gone.
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(ApplyOutcome::Transient(
                "deadline exceeded before the transaction could commit".to_string(),
            ));
        }

        if self.keys.contains(&tx.external_id) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let balance = match tx.state.apply(data.balance, tx.amount) {
            Ok(balance) => balance,
            Err(BalanceRejection::InsufficientFunds) => {
                return Ok(ApplyOutcome::InsufficientFunds {
                    balance: data.balance,
                });
            }
            Err(BalanceRejection::LimitExceeded) => {
                return Ok(ApplyOutcome::BalanceLimitExceeded {
                    balance: data.balance,
                });
            }
        };

        let claim = self
            .keys
            .claim(&tx.external_id, || self.commit(account, &mut data, tx, balance));

        Ok(match claim {
            Claim::Committed(record) => ApplyOutcome::Applied { record, balance },
            // Another user's row claimed the same id first.
            Claim::Taken => ApplyOutcome::AlreadyApplied,
            Claim::Aborted(TransactionError::Transient(reason)) => ApplyOutcome::Transient(reason),
            Claim::Aborted(other) => ApplyOutcome::Transient(other.to_string()),
        })
    }

    /// Journals and commits a claimed transaction. Runs with the row and index shard held.
    fn commit(
        &self,
        account: &UserAccount,
        data: &mut UserData,
        tx: &NewTransaction,
        balance: Money,
    ) -> Result<(RecordId, TransactionRecord), TransactionError> {
        debug_assert_eq!(account.id(), tx.user_id);
        let record = TransactionRecord {
            id: RecordId(self.next_record_id.fetch_add(1, Ordering::SeqCst)),
            user_id: tx.user_id,
            external_id: tx.external_id.clone(),
            state: tx.state,
            amount: tx.amount,
            source_type: tx.source_type,
            created_at: Utc::now(),
        };

        self.append(&JournalEntry::Transaction(record.clone()))?;
        account.commit(data, record.clone(), balance);
        Ok((record.id, record))
    }

    fn insert_user(&self, user_id: UserId, balance: Money) -> Result<bool, TransactionError> {
        if balance.is_negative() {
            return Err(ParseMoneyError::Negative(balance.to_string()).into());
        }
        if balance > Money::MAX {
            return Err(ParseMoneyError::OutOfRange(balance.to_string()).into());
        }

        match self.users.entry(user_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let created_at = Utc::now();
                self.append(&JournalEntry::User {
                    id: user_id,
                    balance,
                    created_at,
                })?;
                slot.insert(Arc::new(UserAccount::new(user_id, balance, created_at)));
                self.next_user_id.fetch_max(user_id.0 + 1, Ordering::SeqCst);
                Ok(true)
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    fn get_balance(&self, user_id: UserId) -> Result<Money, TransactionError> {
        self.account(user_id)
            .map(|account| account.balance())
            .ok_or(TransactionError::UserNotFound(user_id))
    }

    fn user(&self, user_id: UserId) -> Result<User, TransactionError> {
        self.account(user_id)
            .map(|account| account.snapshot())
            .ok_or(TransactionError::UserNotFound(user_id))
    }

    #[instrument(
        level = "debug",
        skip(self, tx, deadline),
        fields(user_id = %tx.user_id, external_id = %tx.external_id)
    )]
    fn apply_transaction(&self, tx: &NewTransaction, deadline: Option<Instant>) -> ApplyOutcome {
        let Some(account) = self.account(tx.user_id) else {
            return ApplyOutcome::UserNotFound;
        };

        match self.retry.run(deadline, |wait| self.attempt(&account, tx, wait, deadline)) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "giving up on transaction");
                ApplyOutcome::Transient(e.to_string())
            }
        }
    }

    fn transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, TransactionError> {
        self.account(user_id)
            .map(|account| account.transactions())
            .ok_or(TransactionError::UserNotFound(user_id))
    }

    fn seed_user(&self, user_id: UserId, balance: Money) -> Result<bool, TransactionError> {
        let created = self.insert_user(user_id, balance)?;
        if created {
            info!(%user_id, %balance, "seeded user");
        }
        Ok(created)
    }

    fn create_user(&self, balance: Money) -> Result<UserId, TransactionError> {
        loop {
            let user_id = UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst));
            // A seeded id may sit ahead of the sequence; skip it.
            if self.insert_user(user_id, balance)? {
                debug!(%user_id, "created user");
                return Ok(user_id);
            }
        }
    }
}
