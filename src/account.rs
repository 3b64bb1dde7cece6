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

//! Per-user balance rows.
//!
//! Each row is independently lockable. Writers hold the row mutex for the whole
//! read-compute-write unit; the last committed balance is also published separately so
//! balance reads never wait behind an in-flight unit.

use crate::base::UserId;
use crate::money::Money;
use crate::transaction::TransactionRecord;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::time::Duration;

/// Point-in-time view of a user row.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    /// Commit time of the latest transaction, or `created_at` if there is none.
    pub updated_at: DateTime<Utc>,
}

/// Mutable state of a row, only reachable through the row mutex.
#[derive(Debug)]
pub(crate) struct UserData {
    pub(crate) balance: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Committed transactions, oldest first.
    history: Vec<TransactionRecord>,
}

impl UserData {
    fn assert_invariants(&self) {
        debug_assert!(
            !self.balance.is_negative(),
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }
}

#[derive(Debug)]
pub(crate) struct UserAccount {
    id: UserId,
    inner: Mutex<UserData>,
    committed: RwLock<Money>,
}

impl UserAccount {
    pub(crate) fn new(id: UserId, balance: Money, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            inner: Mutex::new(UserData {
                balance,
                created_at,
                updated_at: created_at,
                history: Vec::new(),
            }),
            committed: RwLock::new(balance),
        }
    }

    pub(crate) fn id(&self) -> UserId {
        self.id
    }

    /// Last committed balance.
    pub(crate) fn balance(&self) -> Money {
        *self.committed.read()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, UserData> {
        self.inner.lock()
    }

    /// Waits at most `wait` for the row lock.
    pub(crate) fn try_lock_for(&self, wait: Duration) -> Option<MutexGuard<'_, UserData>> {
        self.inner.try_lock_for(wait)
    }

    /// Records `record`, moves the balance to `balance` and publishes it.
    ///
    /// `data` must be the guard of this row.
    pub(crate) fn commit(&self, data: &mut UserData, record: TransactionRecord, balance: Money) {
        debug_assert_eq!(record.user_id, self.id);
        data.balance = balance;
        data.updated_at = record.created_at;
        data.history.push(record);
        data.assert_invariants();
        *self.committed.write() = balance;
    }

    pub(crate) fn snapshot(&self) -> User {
        let data = self.inner.lock();
        User {
            id: self.id,
            balance: data.balance,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Committed transactions, newest first.
    pub(crate) fn transactions(&self) -> Vec<TransactionRecord> {
        self.inner.lock().history.iter().rev().cloned().collect()
    }
}
