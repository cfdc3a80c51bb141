// ABOUTME: Failure handling helpers shared by request paths and background tasks
// ABOUTME: Bounded exponential backoff and jittered retry of lost refresh races
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

mod retry;

pub use retry::{retry_concurrent_refresh, with_retry, RetryPolicy, CONCURRENT_REFRESH_RETRIES};
