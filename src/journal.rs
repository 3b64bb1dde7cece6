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

//! Append-only CSV journal.
//!
//! Every committed change to the ledger is one row. Rows are written and synced before
//! the change becomes visible in memory, so replaying the file reproduces every balance
//! and every claimed external id.
//!
//! A failed append truncates the file back to its last synced length, so a row whose
//! change was rolled back never reaches a replay. If that truncation fails too the journal
//! refuses further appends until it is reopened. On open, bytes after the last newline
//! belong to a row that was never acknowledged and are dropped.
//!
//! # CSV Format
//!
//! Columns: `kind, id, user_id, external_id, state, amount, source_type, created_at`
//!
//! ```csv
//! kind,id,user_id,external_id,state,amount,source_type,created_at
//! user,1,,,,100.00,,2025-01-01T00:00:00Z
//! tx,1,1,tx-1,win,25.50,game,2025-01-01T00:00:01Z
//! ```
//!
//! For `user` rows `id` is the user id and `amount` the starting balance.

use crate::base::{ExternalId, RecordId, UserId};
use crate::error::JournalError;
use crate::money::Money;
use crate::transaction::{SourceType, TransactionRecord, TransactionState};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

const HEADER: &[u8] = b"kind,id,user_id,external_id,state,amount,source_type,created_at\n";

/// A change recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    User {
        id: UserId,
        balance: Money,
        created_at: DateTime<Utc>,
    },
    Transaction(TransactionRecord),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RowKind {
    User,
    Tx,
}

/// Raw CSV row. Transaction-only columns are empty on `user` rows.
#[derive(Debug, Serialize, Deserialize)]
struct JournalRow {
    kind: RowKind,
    id: u64,
    user_id: Option<UserId>,
    external_id: Option<ExternalId>,
    state: Option<TransactionState>,
    amount: Money,
    source_type: Option<SourceType>,
    created_at: DateTime<Utc>,
}

impl JournalRow {
    fn from_entry(entry: &JournalEntry) -> Self {
        match entry {
            JournalEntry::User {
                id,
                balance,
                created_at,
            } => Self {
                kind: RowKind::User,
                id: id.0,
                user_id: None,
                external_id: None,
                state: None,
                amount: *balance,
                source_type: None,
                created_at: *created_at,
            },
            JournalEntry::Transaction(record) => Self {
                kind: RowKind::Tx,
                id: record.id.0,
                user_id: Some(record.user_id),
                external_id: Some(record.external_id.clone()),
                state: Some(record.state),
                amount: record.amount,
                source_type: Some(record.source_type),
                created_at: record.created_at,
            },
        }
    }

    fn into_entry(self, line: u64) -> Result<JournalEntry, JournalError> {
        let missing = |column: &str| JournalError::Corrupt {
            line,
            reason: format!("tx row without {column}"),
        };

        match self.kind {
            RowKind::User => Ok(JournalEntry::User {
                id: UserId(self.id),
                balance: self.amount,
                created_at: self.created_at,
            }),
            RowKind::Tx => Ok(JournalEntry::Transaction(TransactionRecord {
                id: RecordId(self.id),
                user_id: self.user_id.ok_or_else(|| missing("user_id"))?,
                external_id: self.external_id.ok_or_else(|| missing("external_id"))?,
                state: self.state.ok_or_else(|| missing("state"))?,
                amount: self.amount,
                source_type: self.source_type.ok_or_else(|| missing("source_type"))?,
                created_at: self.created_at,
            })),
        }
    }
}

/// File operations the journal needs besides writing.
pub(crate) trait JournalFile: Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl JournalFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write end of the journal. `len` is the length of the synced prefix.
struct Tail {
    file: Box<dyn JournalFile>,
    len: u64,
    poisoned: bool,
}

impl Tail {
    /// Writes and syncs `bytes`, or leaves the file at its previous length.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "journal is unusable after a failed rollback, reopen it",
            ));
        }

        let written = self.file.write_all(bytes).and_then(|()| self.file.sync());
        if let Err(e) = written {
            let len = self.len;
            // The next successful sync also makes the truncation durable.
            if let Err(rollback) = self.file.truncate(len) {
                error!(error = %rollback, len, "journal rollback failed");
                self.poisoned = true;
            }
            return Err(e);
        }

        self.len += bytes.len() as u64;
        Ok(())
    }
}

/// Handle to an open journal file.
pub struct Journal {
    path: PathBuf,
    tail: Mutex<Tail>,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Journal {
    /// Opens (or creates) the journal at `path` and returns the entries already in it,
    /// each paired with its line number.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and on rows that cannot be decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<(u64, JournalEntry)>), JournalError> {
        Self::open_with(path, |file| Box::new(file))
    }

    /// Like [`Journal::open`], writing through `wrap(file)`.
    pub(crate) fn open_with(
        path: impl AsRef<Path>,
        wrap: impl FnOnce(File) -> Box<dyn JournalFile>,
    ) -> Result<(Self, Vec<(u64, JournalEntry)>), JournalError> {
        let path = path.as_ref().to_path_buf();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let complete = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);

        let mut entries = Vec::new();
        if complete > 0 {
            let mut rdr = ReaderBuilder::new()
                .has_headers(true)
                .from_reader(&bytes[..complete]);
            for (index, result) in rdr.deserialize::<JournalRow>().enumerate() {
                // Line 1 is the header.
                let line = index as u64 + 2;
                let row = result.map_err(|e| JournalError::Corrupt {
                    line,
                    reason: e.to_string(),
                })?;
                entries.push((line, row.into_entry(line)?));
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if complete < bytes.len() {
            warn!(
                path = %path.display(),
                dropped = bytes.len() - complete,
                "dropping torn row at end of journal"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }

        let mut tail = Tail {
            file: wrap(file),
            len: complete as u64,
            poisoned: false,
        };
        if complete == 0 {
            tail.append(HEADER)?;
        }

        Ok((
            Self {
                path,
                tail: Mutex::new(tail),
            },
            entries,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and syncs it to disk. On error the file is left as it was.
    pub fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let row = encode(entry)?;
        self.tail.lock().append(&row)?;
        Ok(())
    }
}

fn encode(entry: &JournalEntry) -> Result<Vec<u8>, JournalError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.serialize(JournalRow::from_entry(entry))?;
    writer
        .into_inner()
        .map_err(|e| JournalError::Io(e.into_error()))
}
