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

//! REST API over the [`Processor`].
//!
//! ## Endpoints
//!
//! - `POST /user/{userId}/transaction` - Apply a win or lose (`Source-Type` header required)
//! - `GET /user/{userId}` - User row with timestamps
//! - `GET /user/{userId}/balance` - Committed balance
//! - `GET /user/{userId}/transactions` - Committed transactions, newest first
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8080/user/1/transaction \
//!   -H "Content-Type: application/json" \
//!   -H "Source-Type: game" \
//!   -d '{"state": "win", "amount": "10.15", "transactionId": "tx-1"}'
//!
//! curl http://localhost:8080/user/1/balance
//! ```
//!
//! Store calls block on row locks, so handlers run them on the blocking pool.

use crate::account::User;
use crate::base::UserId;
use crate::error::{ErrorKind, TransactionError};
use crate::processor::{BalanceView, Processor, Receipt};
use crate::store::LedgerStore;
use crate::transaction::{TransactionRecord, TransactionRequest};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const SOURCE_TYPE_HEADER: &str = "Source-Type";

/// Seconds a client should wait before resubmitting after a transient failure.
const RETRY_AFTER_SECS: &str = "1";

// === Application State ===

/// Shared state of every handler.
pub struct AppState<S> {
    pub processor: Arc<Processor<S>>,
    /// Budget for one transaction, lock waits and backoff included.
    pub request_timeout: Duration,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            request_timeout: self.request_timeout,
        }
    }
}

// === Error Handling ===

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid user id '{0}', must be a positive integer")]
    InvalidUserId(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUserId(_) | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transaction(e) => match e.kind() {
                ErrorKind::InvalidAmount
                | ErrorKind::InvalidTransactionState
                | ErrorKind::InvalidSourceType
                | ErrorKind::MissingField => StatusCode::BAD_REQUEST,
                ErrorKind::UserNotFound => StatusCode::NOT_FOUND,
                ErrorKind::AlreadyApplied => StatusCode::CONFLICT,
                ErrorKind::InsufficientFunds | ErrorKind::BalanceLimitExceeded => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidUserId(_) => "INVALID_USER_ID",
            Self::InvalidBody(_) => "INVALID_REQUEST_BODY",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Transaction(e) => e.code(),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(e) if e.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            retryable,
        });

        let mut response = (status, body).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

// === Handlers ===

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(UserId(id)),
        _ => Err(ApiError::InvalidUserId(raw.to_string())),
    }
}

/// Runs a blocking store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransactionError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!(error = %e, "blocking task failed");
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}

/// POST /user/{userId}/transaction - Apply a transaction.
async fn create_transaction<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<Receipt>, ApiError> {
    let user_id = parse_user_id(&user_id)?;

    let source_type = headers
        .get(SOURCE_TYPE_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(TransactionError::MissingField(SOURCE_TYPE_HEADER))?;

    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let deadline = Instant::now() + state.request_timeout;
    let processor = Arc::clone(&state.processor);
    let receipt = blocking(move || {
        processor.process_until(user_id, &source_type, &request, Some(deadline))
    })
    .await?;

    Ok(Json(receipt))
}

/// GET /user/{userId} - User row.
async fn get_user<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let processor = Arc::clone(&state.processor);
    let user = blocking(move || processor.user(user_id)).await?;
    Ok(Json(user))
}

/// GET /user/{userId}/balance - Committed balance.
async fn get_balance<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceView>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let processor = Arc::clone(&state.processor);
    let view = blocking(move || processor.balance(user_id)).await?;
    Ok(Json(view))
}

/// GET /user/{userId}/transactions - Committed transactions, newest first.
async fn list_transactions<S: LedgerStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let processor = Arc::clone(&state.processor);
    let records = blocking(move || processor.transactions(user_id)).await?;
    Ok(Json(records))
}

// === Router ===

pub fn router<S: LedgerStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/user/{user_id}", get(get_user::<S>))
        .route("/user/{user_id}/transaction", post(create_transaction::<S>))
        .route("/user/{user_id}/balance", get(get_balance::<S>))
        .route("/user/{user_id}/transactions", get(list_transactions::<S>))
        .with_state(state)
}

/// Serves `app` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "ledger API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
}
