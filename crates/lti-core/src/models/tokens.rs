// ABOUTME: OAuth2 token models for LMS REST APIs and LTI Advantage client-credentials tokens
// ABOUTME: Service and advisory-lock enums plus freshness rules shared by token services
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// A token received less than this many seconds ago is not refreshed again
pub const REFRESH_SKIP_WINDOW_SECS: i64 = 30;

/// A JWT client-credentials token is treated as expired this many seconds early
pub const JWT_TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Remote API an [`OAuth2Token`] authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2Service {
    /// Canvas REST API
    Canvas,
    /// Canvas Studio media API
    CanvasStudio,
    /// Blackboard Learn REST API
    Blackboard,
    /// D2L Brightspace Valence API
    D2l,
}

impl OAuth2Service {
    /// Every supported service
    pub const ALL: [Self; 4] = [Self::Canvas, Self::CanvasStudio, Self::Blackboard, Self::D2l];

    /// Database and URL form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Canvas => "canvas",
            Self::CanvasStudio => "canvas_studio",
            Self::Blackboard => "blackboard",
            Self::D2l => "d2l",
        }
    }

    /// Route the browser calls to refresh this service's token
    #[must_use]
    pub fn refresh_route(self) -> String {
        format!("/api/{}/oauth/refresh", self.as_str())
    }

    /// Route the browser visits to (re-)authorize this service
    #[must_use]
    pub fn authorize_route(self) -> String {
        format!("/api/{}/oauth/authorize", self.as_str())
    }

    /// Redirect path registered with the LMS
    #[must_use]
    pub fn callback_path(self) -> String {
        format!("/api/{}/oauth/callback", self.as_str())
    }
}

impl fmt::Display for OAuth2Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuth2Service {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|service| service.as_str() == s)
            .ok_or_else(|| AppError::invalid_input(format!("Unknown OAuth2 service: {s}")))
    }
}

/// Advisory lock namespaces (first half of the two-integer lock key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LockType {
    /// Refresh of one `oauth2_tokens` row
    OAuth2TokenRefresh = 1,
    /// Fetch of one `(registration, scopes)` client-credentials token
    JwtOAuth2TokenRefresh = 2,
}

impl LockType {
    /// Integer namespace
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Stored access/refresh token pair for one `(tenant, user, service)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    /// Row id (advisory lock key)
    pub id: i64,
    /// Tenant
    pub application_instance_id: i64,
    /// Local user
    pub user_id: i64,
    /// Service the token authorizes
    pub service: OAuth2Service,
    /// Bearer token
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Refresh token, when the LMS issued one
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds reported by the LMS
    pub expires_in: Option<i64>,
    /// When the token fields were last written
    pub received_at: DateTime<Utc>,
}

impl OAuth2Token {
    /// Whether the token was received inside the skip-refresh window
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        now - self.received_at < Duration::seconds(REFRESH_SKIP_WINDOW_SECS)
    }

    /// Whether the access token's reported lifetime has elapsed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_in
            .is_some_and(|secs| now >= self.received_at + Duration::seconds(secs))
    }
}

/// New token values to persist
#[derive(Debug, Clone)]
pub struct OAuth2TokenUpdate {
    /// Tenant
    pub application_instance_id: i64,
    /// Local user
    pub user_id: i64,
    /// Service
    pub service: OAuth2Service,
    /// New access token
    pub access_token: String,
    /// New refresh token; `None` keeps the stored one
    pub refresh_token: Option<String>,
    /// Reported lifetime
    pub expires_in: Option<i64>,
    /// Receipt time
    pub received_at: DateTime<Utc>,
}

/// Client-credentials token for LTI Advantage services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtOAuth2Token {
    /// Row id
    pub id: i64,
    /// Registration the token was issued to
    pub lti_registration_id: i64,
    /// Sorted, space-joined scopes
    pub scopes: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
    /// When the token was stored
    pub received_at: DateTime<Utc>,
}

impl JwtOAuth2Token {
    /// Whether the token can still be used at `now`
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(JWT_TOKEN_EXPIRY_MARGIN_SECS)
    }
}

/// Canonical scope string: deduplicated, sorted, space-joined
#[must_use]
pub fn normalize_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    let mut scopes: Vec<&str> = scopes
        .iter()
        .flat_map(|scope| scope.as_ref().split_whitespace())
        .collect();
    scopes.sort_unstable();
    scopes.dedup();
    scopes.join(" ")
}
