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

//! Unique index of claimed external transaction ids.
//!
//! A key is claimed through [`IdempotencyIndex::claim`], which holds the key's
//! [`DashMap`] shard for the whole commit closure. Anyone else asking for the same key
//! waits until the closure has either committed (the key becomes visible together with
//! the committed effect) or aborted (the key stays free).

use crate::base::{ExternalId, RecordId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Result of [`IdempotencyIndex::claim`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Claim<T, E> {
    /// Key already belongs to a committed record; the closure did not run.
    Taken,
    Committed(T),
    /// Closure failed; the key was not inserted.
    Aborted(E),
}

#[derive(Debug, Default)]
pub(crate) struct IdempotencyIndex {
    keys: DashMap<ExternalId, RecordId>,
}

impl IdempotencyIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, key: &ExternalId) -> bool {
        self.keys.contains_key(key)
    }

    /// Runs `commit` only if `key` is unclaimed and inserts the returned record id.
    ///
    /// Must not be called while holding a reference into this index.
    pub(crate) fn claim<T, E>(
        &self,
        key: &ExternalId,
        commit: impl FnOnce() -> Result<(RecordId, T), E>,
    ) -> Claim<T, E> {
        // Entry keeps the shard write-locked until the slot is filled or dropped.
        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => Claim::Taken,
            Entry::Vacant(slot) => match commit() {
                Ok((record_id, value)) => {
                    slot.insert(record_id);
                    Claim::Committed(value)
                }
                Err(error) => Claim::Aborted(error),
            },
        }
    }

    /// Inserts a key recovered from the journal. Returns `false` if it was already present.
    pub(crate) fn restore(&self, key: ExternalId, record_id: RecordId) -> bool {
        match self.keys.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record_id);
                true
            }
        }
    }
}
