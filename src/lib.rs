// ABOUTME: Main library entry point for the LTI launch core
// ABOUTME: LTI 1.1/1.3 launch verification, tenant routing, identity and LMS token management
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # LTI Launch
//!
//! Authentication and launch-routing core of an LMS-embedded annotation tool.
//!
//! ## Features
//!
//! - **LTI 1.1**: OAuth 1.0a HMAC-SHA1 verification with a shared nonce store
//! - **LTI 1.3**: OIDC login initiation and `id_token` validation against cached platform key sets
//! - **Tenants**: application instances, registrations and organizations with typed settings
//! - **Identity**: deterministic pseudonymous user and group ids for the annotation service
//! - **Tokens**: grant tokens, single-flight OAuth2 refresh and LTI Advantage service tokens
//! - **Keyset**: rotating RSA signing keys published as a JWKS
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lti_launch::config::environment::ServerConfig;
//! use lti_launch::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("LTI launch server configured on port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Injectable wall clock
pub mod clock;

/// Configuration management
pub mod config;

/// Protocol constants and time windows
pub mod constants;

/// Dependency bundle for handlers and tasks
pub mod context;

/// AES-CFB, JWS and RSA key material
pub mod crypto;

/// `SQLite` database implementation
pub mod database;

/// Database abstraction layer with plugin support
pub mod database_plugins;

/// Unified error handling with standard error codes and HTTP responses
pub mod errors;

/// Retry helpers for upstream and lock contention failures
pub mod failsafe;

/// Grant tokens for the annotation client
pub mod grant_token;

/// `h_userid`, group ids and per-launch user records
pub mod identity;

/// Rotating RSA signing keyset
pub mod keyset;

/// Production logging and structured output
pub mod logging;

/// LTI 1.1 and 1.3 launch verification
pub mod lti;

/// LTI Advantage client-credentials tokens
pub mod ltia;

/// Shared data models
pub mod models;

/// Per-user OAuth2 tokens for LMS APIs
pub mod oauth2_tokens;

/// `HTTP` routes
pub mod routes;

/// Token-aware HTTP clients for LMS and LTI Advantage APIs
pub mod services;

/// Launch session tokens and cookies
pub mod session;

/// Background key rotation and nonce purge
pub mod tasks;

/// Tenant registry and typed settings
pub mod tenants;
