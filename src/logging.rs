// ABOUTME: Tracing subscriber setup for the server and CLI binaries
// ABOUTME: RUST_LOG filtering with text or JSON output selected by LOG_FORMAT
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::env;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::errors::{AppError, AppResult};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single line
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse `LOG_FORMAT`; anything but `json` means text
    #[must_use]
    pub fn from_str_or_default(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(format: LogFormat, default_directive: &str) -> AppResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| AppError::internal(format!("Failed to initialize logging: {e}")))
}

/// Install the global subscriber from `LOG_FORMAT` and `RUST_LOG`
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_from_env() -> AppResult<()> {
    let format = env::var("LOG_FORMAT")
        .map(|value| LogFormat::from_str_or_default(&value))
        .unwrap_or_default();
    init(format, "info,sqlx=warn,hyper=warn")
}
