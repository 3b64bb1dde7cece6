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

//! Integration tests for the REST API.
//!
//! Each test starts the real router on an ephemeral port and talks to it with reqwest.

use balance_ledger::api::{self, AppState};
use balance_ledger::{LedgerStore, MemoryStore, Money, Processor, UserId};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    processor: Arc<Processor<MemoryStore>>,
}

impl TestServer {
    async fn new() -> Self {
        let store = MemoryStore::new();
        for id in 1..=3 {
            store.seed_user(UserId(id), Money::from_cents(10000)).unwrap();
        }
        let processor = Arc::new(Processor::new(store));
        let state = AppState {
            processor: processor.clone(),
            request_timeout: Duration::from_secs(2),
        };

        let app = api::router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { base_url, processor }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(
        &self,
        client: &Client,
        user: &str,
        source_type: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut request = client
            .post(self.url(&format!("/user/{user}/transaction")))
            .json(&body);
        if let Some(source_type) = source_type {
            request = request.header(api::SOURCE_TYPE_HEADER, source_type);
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

fn body(state: &str, amount: &str, transaction_id: &str) -> Value {
    json!({ "state": state, "amount": amount, "transactionId": transaction_id })
}

// === Tests ===

#[tokio::test]
async fn transaction_then_balance() {
    let server = TestServer::new().await;
    let client = Client::new();

    let (status, json) = server
        .post(&client, "1", Some("game"), body("win", "10.15", "tx-1"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Transaction processed successfully");
    assert_eq!(json["balance"], "110.15");

    let response = client.get(server.url("/user/1/balance")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json, json!({ "userId": 1, "balance": "110.15" }));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let server = TestServer::new().await;
    let client = Client::new();

    server
        .post(&client, "1", Some("game"), body("win", "1.00", "tx-1"))
        .await;

    let cases = [
        ("1", Some("game"), body("win", "1.00", "tx-1"), StatusCode::CONFLICT, "TRANSACTION_ALREADY_PROCESSED"),
        ("1", Some("game"), body("lose", "500.00", "tx-2"), StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS"),
        ("42", Some("game"), body("win", "1.00", "tx-3"), StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
        ("1", Some("game"), body("win", "abc", "tx-4"), StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        ("1", Some("game"), body("draw", "1.00", "tx-5"), StatusCode::BAD_REQUEST, "INVALID_TRANSACTION_STATE"),
        ("1", Some("web"), body("win", "1.00", "tx-6"), StatusCode::BAD_REQUEST, "INVALID_SOURCE_TYPE"),
        ("1", None, body("win", "1.00", "tx-7"), StatusCode::BAD_REQUEST, "MISSING_FIELD"),
        ("1", Some("game"), body("win", "1.00", ""), StatusCode::BAD_REQUEST, "MISSING_FIELD"),
        ("0", Some("game"), body("win", "1.00", "tx-8"), StatusCode::BAD_REQUEST, "INVALID_USER_ID"),
        ("abc", Some("game"), body("win", "1.00", "tx-9"), StatusCode::BAD_REQUEST, "INVALID_USER_ID"),
    ];

    for (user, source_type, payload, expected_status, expected_code) in cases {
        let (status, json) = server.post(&client, user, source_type, payload).await;
        assert_eq!(status, expected_status, "{expected_code}: {json}");
        assert_eq!(json["code"], expected_code);
        assert_eq!(json["retryable"], false);
        assert!(json["error"].is_string());
    }

    // Only the first transaction applied.
    assert_eq!(
        server.processor.balance(UserId(1)).unwrap().balance.to_string(),
        "101.00"
    );
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = client
        .post(server.url("/user/1/transaction"))
        .header(api::SOURCE_TYPE_HEADER, "game")
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["code"], "INVALID_REQUEST_BODY");
}

#[tokio::test]
async fn unknown_user_balance_is_not_found() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = client.get(server.url("/user/99/balance")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get(server.url("/user/0/balance")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_row_tracks_last_update() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = client.get(server.url("/user/1")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let before: Value = response.json().await.unwrap();
    assert_eq!(before["id"], 1);
    assert_eq!(before["balance"], "100.00");
    assert_eq!(before["createdAt"], before["updatedAt"]);

    let (status, _) = server
        .post(&client, "1", Some("server"), body("lose", "40.00", "tx-1"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let after: Value = client
        .get(server.url("/user/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["balance"], "60.00");
    assert_eq!(after["createdAt"], before["createdAt"]);
    let listed: Value = client
        .get(server.url("/user/1/transactions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["updatedAt"], listed[0]["createdAt"]);

    let response = client.get(server.url("/user/77")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transactions_are_listed_newest_first() {
    let server = TestServer::new().await;
    let client = Client::new();

    server.post(&client, "2", Some("game"), body("win", "5.00", "a")).await;
    server.post(&client, "2", Some("payment"), body("lose", "2.50", "b")).await;

    let response = client.get(server.url("/user/2/transactions")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    let records = json.as_array().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["transactionId"], "b");
    assert_eq!(records[0]["state"], "lose");
    assert_eq!(records[0]["sourceType"], "payment");
    assert_eq!(records[0]["amount"], "2.50");
    assert_eq!(records[1]["transactionId"], "a");
}

/// Many concurrent submissions of one transaction id apply exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_requests_apply_once() {
    let server = TestServer::new().await;
    let client = Client::new();

    const NUM_REQUESTS: usize = 50;

    let requests = (0..NUM_REQUESTS).map(|_| {
        let client = client.clone();
        let url = server.url("/user/3/transaction");
        async move {
            client
                .post(&url)
                .header(api::SOURCE_TYPE_HEADER, "game")
                .json(&body("win", "25.50", "dup"))
                .send()
                .await
                .unwrap()
                .status()
        }
    });

    let statuses = join_all(requests).await;
    let ok = statuses.iter().filter(|&&s| s == StatusCode::OK).count();
    let conflicts = statuses.iter().filter(|&&s| s == StatusCode::CONFLICT).count();

    assert_eq!(ok, 1);
    assert_eq!(conflicts, NUM_REQUESTS - 1);
    assert_eq!(
        server.processor.balance(UserId(3)).unwrap().balance.to_string(),
        "125.50"
    );
}

/// Concurrent wins to different users each land exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "heavy load test, run manually"]
async fn concurrent_wins_to_multiple_users() {
    let server = TestServer::new().await;
    let client = Client::new();

    const WINS_PER_USER: usize = 200;
    const BATCH_SIZE: usize = 100; // Limit concurrent connections

    let all_requests: Vec<(u64, usize)> = (1..=3)
        .flat_map(|user| (0..WINS_PER_USER).map(move |i| (user, i)))
        .collect();

    for batch in all_requests.chunks(BATCH_SIZE) {
        let requests = batch.iter().map(|&(user, i)| {
            let client = client.clone();
            let url = server.url(&format!("/user/{user}/transaction"));
            async move {
                client
                    .post(&url)
                    .header(api::SOURCE_TYPE_HEADER, "server")
                    .json(&body("win", "1.00", &format!("u{user}-{i}")))
                    .send()
                    .await
                    .unwrap()
                    .status()
            }
        });
        for status in join_all(requests).await {
            assert_eq!(status, StatusCode::OK);
        }
    }

    for user in 1..=3 {
        assert_eq!(
            server.processor.balance(UserId(user)).unwrap().balance.to_string(),
            "300.00"
        );
    }
}
