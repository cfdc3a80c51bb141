// ABOUTME: Outbound HTTP services for LMS REST APIs and LTI Advantage services
// ABOUTME: Shared client construction and bearer-token wrappers that classify authorization failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// HTTP client and token-bearing wrappers
pub mod http;

pub use http::{build_http_client, HttpService, LtiaHttpService, OAuthHttpService};
