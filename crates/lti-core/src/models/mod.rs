// ABOUTME: Persisted entity types for tenants, users, tokens and signing keys
// ABOUTME: Re-exports every model so callers can `use lti_core::models::*`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

mod keys;
mod tenant;
mod tokens;
mod users;

pub use keys::RsaKey;
pub use tenant::{
    ApplicationInstance, LtiRegistration, LtiVersion, NewApplicationInstance,
    NewLtiRegistration, NewOrganization, Organization,
};
pub use tokens::{
    normalize_scopes, JwtOAuth2Token, LockType, OAuth2Service, OAuth2Token, OAuth2TokenUpdate,
    JWT_TOKEN_EXPIRY_MARGIN_SECS, REFRESH_SKIP_WINDOW_SECS,
};
pub use users::{Course, CourseUpsert, LmsUser, User, UserUpsert};
