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

use balance_ledger::api::{self, AppState};
use balance_ledger::{Config, LedgerStore, MemoryStore, Processor, logging};
use clap::Parser;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = logging::init(&config.log_config()) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening ledger: {}", e);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding '{}': {}", config.listen, e);
            process::exit(1);
        }
    };

    let state = AppState {
        processor: Arc::new(Processor::new(store)),
        request_timeout: config.request_timeout(),
    };

    if let Err(e) = api::serve(listener, api::router(state)).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}

/// Opens the journal (or an in-memory store) and seeds the configured users.
fn open_store(config: &Config) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let store = match &config.journal {
        Some(path) => MemoryStore::open(path, config.retry_policy())?,
        None => MemoryStore::with_policy(config.retry_policy()),
    };

    for user_id in config.seed_user_ids() {
        store.seed_user(user_id, config.initial_balance)?;
    }
    info!(users = store.user_count(), "ledger ready");

    Ok(store)
}
