// ABOUTME: OAuth2 token cache for LMS REST APIs called on behalf of a user
// ABOUTME: Per-service endpoints, signed authorization state and the single-flight refresh service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # OAuth2 token store
//!
//! Tokens are keyed by `(application_instance_id, user_id, service)`. A
//! refresh takes the `OAuth2TokenRefresh` advisory lock on the token row so
//! that concurrent workers issue at most one network refresh; losers either
//! fail with `ConcurrentTokenRefresh` or, when opted out, refresh unlocked.

/// Token, authorization and redirect URLs per service
pub mod endpoints;
/// Get, save, refresh and authorization-code exchange
pub mod service;
/// Signed `state` parameter of the authorization redirect
pub mod state;

pub use endpoints::{ClientAuth, OAuth2Endpoints};
pub use service::{OAuth2TokenService, TokenOwner, TokenResponse};
pub use state::{OAuth2StateClaims, OAuth2StateCodec};
