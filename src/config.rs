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

//! Server configuration from command line flags and `LEDGER_*` environment variables.

use crate::base::UserId;
use crate::logging::LogConfig;
use crate::money::Money;
use crate::retry::RetryPolicy;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Balance Ledger - idempotent per-user balance service
///
/// Applies win/lose transactions to user balances over HTTP. Every transaction id is
/// applied at most once.
#[derive(Parser, Debug, Clone)]
#[command(name = "balance-ledger")]
#[command(about = "Idempotent per-user balance ledger", long_about = None)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "LEDGER_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Journal file; without it the ledger lives in memory only
    #[arg(long, env = "LEDGER_JOURNAL", value_name = "FILE")]
    pub journal: Option<PathBuf>,

    /// Users created at startup if absent
    #[arg(
        long,
        env = "LEDGER_SEED_USERS",
        value_delimiter = ',',
        default_values_t = vec![1, 2, 3]
    )]
    pub seed_users: Vec<u64>,

    /// Starting balance of seeded users
    #[arg(
        long,
        env = "LEDGER_INITIAL_BALANCE",
        default_value = "100.00",
        value_parser = Money::parse_balance
    )]
    pub initial_balance: Money,

    /// Longest wait for a user row lock per attempt, in milliseconds
    #[arg(long, env = "LEDGER_LOCK_TIMEOUT_MS", default_value_t = 50)]
    pub lock_timeout_ms: u64,

    /// Attempts per transaction before reporting a transient failure
    #[arg(
        long,
        env = "LEDGER_MAX_ATTEMPTS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_attempts: u32,

    /// First retry backoff, in milliseconds; doubles per retry
    #[arg(long, env = "LEDGER_BACKOFF_MS", default_value_t = 5)]
    pub backoff_ms: u64,

    /// Backoff cap, in milliseconds
    #[arg(long, env = "LEDGER_MAX_BACKOFF_MS", default_value_t = 200)]
    pub max_backoff_ms: u64,

    /// Budget for one transaction request, lock waits and backoff included, in milliseconds
    #[arg(long, env = "LEDGER_REQUEST_TIMEOUT_MS", default_value_t = 2000)]
    pub request_timeout_ms: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LEDGER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LEDGER_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            initial_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.backoff_ms)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    /// Seeded user ids, zero excluded.
    pub fn seed_user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.seed_users.iter().filter(|&&id| id > 0).map(|&id| UserId(id))
    }
}
