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

//! Bounded retry with exponential backoff for lock conflicts.

use backoff::backoff::Backoff;
use backoff::{SystemClock, exponential::ExponentialBackoff};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Returned by an attempt that could not acquire its lock in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict;

/// Why [`RetryPolicy::run`] gave up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryError {
    #[error("lock conflict persisted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("deadline exceeded before the transaction could commit")]
    DeadlineExceeded,
}

/// Retry budget for one atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Longest a single attempt waits for a row lock.
    pub lock_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_timeout: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: doubling from `initial_backoff` up to `max_backoff`,
    /// without jitter. With a deadline the schedule ends once the deadline has passed.
    pub fn schedule(&self, deadline: Option<Instant>) -> ExponentialBackoff<SystemClock> {
        let now = Instant::now();
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            start_time: now,
            max_elapsed_time: deadline.map(|d| d.saturating_duration_since(now)),
            clock: SystemClock::default(),
        }
    }

    /// Runs `attempt` until it succeeds, the attempts run out, or `deadline` passes.
    ///
    /// `attempt` receives how long it may wait for its lock. Sleeps never extend past
    /// the deadline; a deadline that has already passed fails without calling `attempt`.
    pub fn run<T>(
        &self,
        deadline: Option<Instant>,
        mut attempt: impl FnMut(Duration) -> Result<T, Conflict>,
    ) -> Result<T, RetryError> {
        let attempts = self.max_attempts.max(1);
        let mut schedule = self.schedule(deadline);

        for n in 0..attempts {
            if n > 0 {
                let delay = match schedule.next_backoff() {
                    Some(delay) if !deadline.is_some_and(|d| Instant::now() + delay >= d) => delay,
                    _ => return Err(RetryError::DeadlineExceeded),
                };
                warn!(attempt = n + 1, max_attempts = attempts, ?delay, "retrying after lock conflict");
                thread::sleep(delay);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(RetryError::DeadlineExceeded);
                    }
                    remaining.min(self.lock_timeout)
                }
                None => self.lock_timeout,
            };

            match attempt(wait) {
                Ok(value) => return Ok(value),
                Err(Conflict) => continue,
            }
        }

        Err(RetryError::Exhausted { attempts })
    }
}
