// ABOUTME: Retry logic: exponential backoff for background work, jittered retry for refresh-lock contention
// ABOUTME: Only upstream failures and lost lock races are retried; protocol errors return immediately
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::errors::{AppError, AppResult, ErrorCode};

/// Retries after a lost refresh race
pub const CONCURRENT_REFRESH_RETRIES: u32 = 2;

const JITTER_MIN_MS: u64 = 100;
const JITTER_MAX_MS: u64 = 500;

/// Backoff policy for background tasks
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First delay
    pub initial_backoff: Duration,
    /// Delay cap
    pub max_backoff: Duration,
    /// Growth factor between delays
    pub multiplier: f32,
    /// Retries after the first attempt
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2 * 60 * 60),
            multiplier: 2.0,
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts
    #[must_use]
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier)
            .with_max_times(self.max_retries)
            .build()
    }
}

fn is_retryable(error: &AppError) -> bool {
    matches!(
        error.code(),
        ErrorCode::ExternalRequest | ErrorCode::ConcurrentTokenRefresh | ErrorCode::Database
    )
}

/// Run `f`, retrying upstream failures with exponential backoff
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retryable error.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(error) if is_retryable(&error) => {
                let Some(delay) = delays.next() else {
                    debug!(operation = name, attempt, "Max retry attempts reached");
                    return Err(error);
                };
                debug!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Retrying after backoff"
                );
                sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Run `f`, retrying `ConcurrentTokenRefresh` after 100-500 ms of jitter
///
/// # Errors
///
/// Returns the error of the last attempt, or the first error of any other kind.
pub async fn retry_concurrent_refresh<F, Fut, T>(name: &str, mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retries = 0u32;
    loop {
        match f().await {
            Err(error)
                if error.is(ErrorCode::ConcurrentTokenRefresh)
                    && retries < CONCURRENT_REFRESH_RETRIES =>
            {
                retries += 1;
                let delay = rand::thread_rng().gen_range(JITTER_MIN_MS..=JITTER_MAX_MS);
                debug!(operation = name, retries, delay_ms = delay, "Refresh lock busy; retrying");
                sleep(Duration::from_millis(delay)).await;
            }
            other => return other,
        }
    }
}
