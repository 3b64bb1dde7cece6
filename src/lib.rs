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

//! # Balance Ledger
//!
//! Per-user balances moved by idempotent `win` / `lose` transactions. Every transaction
//! carries a caller supplied id; an id is applied at most once, no matter how many
//! times or how concurrently it is submitted, and a balance never goes negative.
//!
//! ## Core Components
//!
//! - [`Money`]: Exact two-decimal amounts with strict parsing
//! - [`LedgerStore`] / [`MemoryStore`]: Users, transactions and the atomic apply
//! - [`Processor`]: Request validation and outcome mapping
//! - [`TransactionError`]: Error types for transaction processing failures
//! - [`api`]: axum routes over the processor
//!
//! ## Example
//!
//! ```
//! use balance_ledger::{LedgerStore, MemoryStore, Money, Processor, TransactionError,
//!     TransactionRequest, UserId};
//!
//! let store = MemoryStore::new();
//! store.seed_user(UserId(1), "100.00".parse().unwrap()).unwrap();
//! let processor = Processor::new(store);
//!
//! let win = TransactionRequest::new("win", "25.50", "tx-1");
//! let receipt = processor.process(UserId(1), "game", &win).unwrap();
//! assert_eq!(receipt.balance.to_string(), "125.50");
//!
//! // Resubmitting the same id has no effect.
//! assert_eq!(
//!     processor.process(UserId(1), "game", &win),
//!     Err(TransactionError::AlreadyApplied("tx-1".into()))
//! );
//! assert_eq!(processor.balance(UserId(1)).unwrap().balance, Money::from_cents(12550));
//! ```
//!
//! ## Thread Safety
//!
//! Each user row has its own lock, so transactions for different users run in
//! parallel while transactions for one user are serialised.

mod account;
pub mod api;
mod base;
pub mod config;
pub mod error;
mod idempotency;
pub mod journal;
pub mod logging;
mod money;
mod processor;
pub mod retry;
mod store;
mod transaction;

pub use account::User;
pub use base::{ExternalId, RecordId, UserId};
pub use config::Config;
pub use error::{ErrorKind, JournalError, TransactionError};
pub use journal::{Journal, JournalEntry};
pub use money::{Money, ParseMoneyError};
pub use processor::{BalanceView, Processor, Receipt};
pub use retry::RetryPolicy;
pub use store::{ApplyOutcome, LedgerStore, MemoryStore};
pub use transaction::{
    BalanceRejection, NewTransaction, SourceType, TransactionRecord, TransactionRequest,
    TransactionState,
};
