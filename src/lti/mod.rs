// ABOUTME: LTI launch verification and resolution for both protocol versions
// ABOUTME: OAuth 1.0a (LTI 1.1), OIDC plus id_token (LTI 1.3), roles, parameter mapping and launch context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LTI
//!
//! Inbound launches arrive either as OAuth 1.0a signed form posts
//! ([`oauth1`]) or as an OIDC login followed by a signed `id_token`
//! ([`oidc`], [`id_token`]). Both verifiers produce a [`LaunchParams`] in
//! LTI 1.1 parameter names, which [`launch::LaunchResolver`] turns into a
//! [`launch::LaunchContext`].

/// LTI 1.3 `id_token` validation
pub mod id_token;
/// Process-local cache of platform key sets
pub mod jwks_cache;
/// Launch context resolution
pub mod launch;
/// OAuth 1.0a signature verification
pub mod oauth1;
/// OIDC third-party login initiation
pub mod oidc;
/// Launch parameter bag and LTI 1.3 claim mapping
pub mod params;
/// LTI role URI grammar
pub mod roles;

pub use id_token::{IdTokenValidator, ValidatedIdToken};
pub use jwks_cache::JwksCache;
pub use launch::{LaunchContext, LaunchResolver, LtiUser, ProductFamily};
pub use oauth1::OAuth1Verifier;
pub use oidc::{OidcLogin, OidcLoginRequest};
pub use params::LaunchParams;
pub use roles::{Role, RoleKind, RoleScope};
