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

//! End-to-end scenarios for the transaction processor.

use balance_ledger::{
    ApplyOutcome, ErrorKind, ExternalId, LedgerStore, MemoryStore, Money, NewTransaction,
    ParseMoneyError, Processor, TransactionError, TransactionRecord, TransactionRequest,
    TransactionState, User, UserId,
};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counts writes that reach the store.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    applies: AtomicUsize,
}

impl LedgerStore for CountingStore {
    fn get_balance(&self, user_id: UserId) -> Result<Money, TransactionError> {
        self.inner.get_balance(user_id)
    }

    fn user(&self, user_id: UserId) -> Result<User, TransactionError> {
        self.inner.user(user_id)
    }

    fn apply_transaction(&self, tx: &NewTransaction, deadline: Option<Instant>) -> ApplyOutcome {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.inner.apply_transaction(tx, deadline)
    }

    fn transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>, TransactionError> {
        self.inner.transactions(user_id)
    }

    fn seed_user(&self, user_id: UserId, balance: Money) -> Result<bool, TransactionError> {
        self.inner.seed_user(user_id, balance)
    }

    fn create_user(&self, balance: Money) -> Result<UserId, TransactionError> {
        self.inner.create_user(balance)
    }
}

fn processor_with(balance: &str) -> Processor<CountingStore> {
    let store = CountingStore::default();
    store
        .seed_user(UserId(1), balance.parse().unwrap())
        .unwrap();
    Processor::new(store)
}

fn balance_of(processor: &Processor<CountingStore>, user: u64) -> Money {
    processor.balance(UserId(user)).unwrap().balance
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn win_then_lose_updates_balance() {
    let processor = processor_with("100.00");

    let receipt = processor
        .process(UserId(1), "game", &TransactionRequest::new("win", "25.50", "tx-1"))
        .unwrap();
    assert_eq!(receipt.balance.as_decimal(), dec!(125.50));
    assert_eq!(balance_of(&processor, 1).to_string(), "125.50");

    let receipt = processor
        .process(UserId(1), "game", &TransactionRequest::new("lose", "15.25", "tx-2"))
        .unwrap();
    assert_eq!(receipt.balance.as_decimal(), dec!(110.25));
    assert_eq!(balance_of(&processor, 1).to_string(), "110.25");
}

#[test]
fn resubmitted_transaction_is_already_applied() {
    let processor = processor_with("100.00");
    let request = TransactionRequest::new("win", "25.50", "tx-1");

    processor.process(UserId(1), "game", &request).unwrap();
    let second = processor.process(UserId(1), "game", &request);

    assert_eq!(second, Err(TransactionError::AlreadyApplied(ExternalId::new("tx-1"))));
    assert_eq!(balance_of(&processor, 1).to_string(), "125.50");
    assert_eq!(processor.transactions(UserId(1)).unwrap().len(), 1);
}

#[test]
fn resubmission_with_different_payload_is_still_already_applied() {
    let processor = processor_with("100.00");

    processor
        .process(UserId(1), "game", &TransactionRequest::new("win", "25.50", "tx-1"))
        .unwrap();
    let result = processor.process(
        UserId(1),
        "payment",
        &TransactionRequest::new("lose", "1.00", "tx-1"),
    );

    assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyApplied);
    assert_eq!(balance_of(&processor, 1).to_string(), "125.50");
}

#[test]
fn loss_beyond_balance_is_insufficient_funds() {
    let processor = processor_with("10.00");

    let result = processor.process(UserId(1), "game", &TransactionRequest::new("lose", "50.00", "tx-3"));

    assert_eq!(
        result,
        Err(TransactionError::InsufficientFunds {
            balance: Money::from_cents(1000),
            requested: Money::from_cents(5000),
        })
    );
    assert_eq!(balance_of(&processor, 1).to_string(), "10.00");
    assert!(processor.transactions(UserId(1)).unwrap().is_empty());
}

#[test]
fn loss_of_entire_balance_reaches_zero() {
    let processor = processor_with("10.00");

    let receipt = processor
        .process(UserId(1), "server", &TransactionRequest::new("lose", "10", "tx-1"))
        .unwrap();

    assert_eq!(receipt.balance, Money::ZERO);
    assert_eq!(balance_of(&processor, 1).to_string(), "0.00");
}

#[test]
fn invalid_amount_never_reaches_store() {
    let processor = processor_with("100.00");

    let result = processor.process(UserId(1), "game", &TransactionRequest::new("win", "abc", "tx-4"));

    assert_eq!(
        result,
        Err(TransactionError::InvalidAmount(ParseMoneyError::NotNumeric("abc".to_string())))
    );
    assert_eq!(processor.store().applies.load(Ordering::SeqCst), 0);
    assert_eq!(balance_of(&processor, 1).to_string(), "100.00");
}

#[test]
fn every_validation_failure_skips_store() {
    let processor = processor_with("100.00");
    let cases = [
        ("web", TransactionRequest::new("win", "1.00", "tx-1"), ErrorKind::InvalidSourceType),
        ("GAME", TransactionRequest::new("win", "1.00", "tx-1"), ErrorKind::InvalidSourceType),
        ("game", TransactionRequest::new("win", "0", "tx-1"), ErrorKind::InvalidAmount),
        ("game", TransactionRequest::new("win", "-1.00", "tx-1"), ErrorKind::InvalidAmount),
        ("game", TransactionRequest::new("win", "1.001", "tx-1"), ErrorKind::InvalidAmount),
        ("game", TransactionRequest::new("win", "", "tx-1"), ErrorKind::InvalidAmount),
        ("game", TransactionRequest::new("Win", "1.00", "tx-1"), ErrorKind::InvalidTransactionState),
        ("game", TransactionRequest::new("", "1.00", "tx-1"), ErrorKind::InvalidTransactionState),
        ("game", TransactionRequest::new("win", "1.00", ""), ErrorKind::MissingField),
    ];

    for (source_type, request, expected) in cases {
        let error = processor.process(UserId(1), source_type, &request).unwrap_err();
        assert_eq!(error.kind(), expected, "{source_type} {request:?}");
        assert!(!error.is_retryable());
    }

    assert_eq!(processor.store().applies.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_user_is_not_found() {
    let processor = processor_with("100.00");

    let result = processor.process(UserId(99), "game", &TransactionRequest::new("win", "1.00", "tx-1"));

    assert_eq!(result, Err(TransactionError::UserNotFound(UserId(99))));
    assert_eq!(
        processor.balance(UserId(99)),
        Err(TransactionError::UserNotFound(UserId(99)))
    );
    // The key was never claimed, so it is still usable.
    assert!(
        processor
            .process(UserId(1), "game", &TransactionRequest::new("win", "1.00", "tx-1"))
            .is_ok()
    );
}

#[test]
fn transaction_ids_are_global_across_users() {
    let processor = processor_with("100.00");
    processor
        .store()
        .seed_user(UserId(2), Money::from_cents(10000))
        .unwrap();

    processor
        .process(UserId(1), "game", &TransactionRequest::new("win", "5.00", "shared"))
        .unwrap();
    let result = processor.process(UserId(2), "game", &TransactionRequest::new("win", "5.00", "shared"));

    assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyApplied);
    assert_eq!(balance_of(&processor, 2).to_string(), "100.00");
}

#[test]
fn history_lists_newest_first() {
    let processor = processor_with("100.00");
    for (i, state) in ["win", "lose", "win"].into_iter().enumerate() {
        processor
            .process(UserId(1), "game", &TransactionRequest::new(state, "1.00", format!("tx-{i}")))
            .unwrap();
    }

    let history = processor.transactions(UserId(1)).unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["tx-2", "tx-1", "tx-0"]);
    assert_eq!(history[1].state, TransactionState::Lose);
}

#[test]
fn expired_deadline_is_transient_and_retryable() {
    let processor = processor_with("100.00");
    let request = TransactionRequest::new("win", "1.00", "tx-1");

    let result = processor.process_until(
        UserId(1),
        "game",
        &request,
        Some(Instant::now() - Duration::from_millis(1)),
    );

    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transient);
    assert!(error.is_retryable());
    assert_eq!(balance_of(&processor, 1).to_string(), "100.00");

    // Retrying the same id after a transient failure applies it.
    assert!(processor.process(UserId(1), "game", &request).is_ok());
    assert_eq!(balance_of(&processor, 1).to_string(), "101.00");
}
