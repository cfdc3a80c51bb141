// ABOUTME: Launch session carried in an HS256-signed cookie or Authorization bearer header
// ABOUTME: Set-Cookie construction with HttpOnly, Secure and SameSite=None for LMS iframes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Session
//!
//! The tool runs inside an LMS iframe, so the cookie is third-party and must
//! be `SameSite=None; Secure`. Clients that cannot send cookies present the
//! same token as `Authorization: Bearer <token>`.

use std::fmt::Write;

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::clock::SharedClock;
use crate::constants::cookies::SESSION;
use crate::constants::limits::SESSION_TTL_SECS;
use crate::crypto::{check_time_claims, hs256_verify, jws_sign, JwsError, SigningKey};
use crate::errors::{AppError, AppResult};
use crate::models::LtiVersion;

/// Session contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Local user id
    pub user_id: i64,
    /// Tenant
    pub application_instance_id: i64,
    /// Hypothesis account id
    pub h_userid: String,
    /// Protocol of the launch
    pub lti_version: LtiVersion,
    /// Whether the user launched with an instructor role
    pub instructor: bool,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// Identity fields a session is issued for
#[derive(Debug, Clone)]
pub struct SessionSubject {
    /// Local user id
    pub user_id: i64,
    /// Tenant
    pub application_instance_id: i64,
    /// Hypothesis account id
    pub h_userid: String,
    /// Protocol of the launch
    pub lti_version: LtiVersion,
    /// Whether the user launched with an instructor role
    pub instructor: bool,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct SessionManager {
    secret: Zeroizing<String>,
    clock: SharedClock,
}

impl SessionManager {
    /// Create a manager signing with `secret`
    #[must_use]
    pub const fn new(secret: Zeroizing<String>, clock: SharedClock) -> Self {
        Self { secret, clock }
    }

    /// Signed session token for `subject`
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if signing fails.
    pub fn issue(&self, subject: SessionSubject) -> AppResult<String> {
        let now = self.clock.now();
        let claims = SessionClaims {
            user_id: subject.user_id,
            application_instance_id: subject.application_instance_id,
            h_userid: subject.h_userid,
            lti_version: subject.lti_version,
            instructor: subject.instructor,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(SESSION_TTL_SECS)).timestamp(),
        };
        Ok(jws_sign(
            &claims,
            &SigningKey::Hmac(self.secret.as_bytes()),
            None,
        )?)
    }

    /// Verify a session token
    ///
    /// # Errors
    ///
    /// Returns a `Signature` error for a bad or expired token.
    pub fn verify(&self, token: &str) -> AppResult<SessionClaims> {
        let rejected = |e: JwsError| AppError::signature(format!("Invalid session: {e}"));
        let claims = hs256_verify(token, self.secret.as_bytes()).map_err(rejected)?;
        check_time_claims(&claims, self.clock.now(), 0, true).map_err(rejected)?;
        serde_json::from_value(claims)
            .map_err(|e| AppError::signature(format!("Malformed session claims: {e}")))
    }

    /// Session from the `session` cookie or a bearer header
    ///
    /// # Errors
    ///
    /// Returns a `Signature` error when neither is present or the token fails
    /// verification.
    pub fn from_headers(&self, headers: &HeaderMap) -> AppResult<SessionClaims> {
        let token = bearer_token(headers)
            .or_else(|| session_cookie(headers))
            .ok_or_else(|| AppError::signature("No session"))?;
        self.verify(&token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION)
        .map(|(_, value)| value.to_owned())
}

/// Set-Cookie value for a session token
#[must_use]
pub fn session_cookie_header(token: &str) -> String {
    let mut cookie = format!("{SESSION}={token}");
    let _ = write!(cookie, "; Max-Age={SESSION_TTL_SECS}");
    cookie.push_str("; Path=/; HttpOnly; Secure; SameSite=None");
    cookie
}

/// Append the session cookie to `headers`
pub fn set_session_cookie(headers: &mut HeaderMap, token: &str) {
    if let Ok(value) = HeaderValue::from_str(&session_cookie_header(token)) {
        headers.append(header::SET_COOKIE, value);
    }
}
