// ABOUTME: OAuth 1.0a HMAC-SHA1 verification of LTI 1.1 launch requests
// ABOUTME: RFC 5849 signature base string, constant-time comparison, timestamp window and nonce replay guard
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LTI 1.1 verifier
//!
//! Parameters from the query string and the form body both enter the
//! signature base string; `oauth_signature` itself does not. Failures of any
//! kind surface as [`ErrorCode::LtiOAuth`](crate::errors::ErrorCode) with no
//! detail beyond the log line.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ring::hmac;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::Url;

use crate::clock::SharedClock;
use crate::constants::limits::OAUTH1_TIMESTAMP_WINDOW_SECS;
use crate::constants::{nonce_scopes, oauth1};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::models::ApplicationInstance;
use crate::tenants::TenantRegistry;

use super::params::LaunchParams;

/// RFC 3986 percent-encoding; only `A-Z a-z 0-9 - . _ ~` stay literal
#[must_use]
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Scheme, host, non-default port and path; no query or fragment
#[must_use]
pub fn normalized_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = url.port().map(|port| format!(":{port}")).unwrap_or_default();
    format!(
        "{}://{host}{port}{}",
        url.scheme().to_ascii_lowercase(),
        url.path()
    )
}

/// Signature base string for `method url` with body parameters `form`
///
/// Query parameters of `url` are merged with `form`.
#[must_use]
pub fn signature_base_string(method: &str, url: &Url, form: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .chain(form.iter().cloned())
        .filter(|(key, _)| key != oauth1::SIGNATURE)
        .map(|(key, value)| (percent_encode(&key), percent_encode(&value)))
        .collect();
    encoded.sort();

    let parameters = encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&normalized_url(url)),
        percent_encode(&parameters)
    )
}

/// Base64 HMAC-SHA1 of `base_string` keyed with `secret&token_secret`
#[must_use]
pub fn sign_hmac_sha1(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let signing_key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
    STANDARD.encode(hmac::sign(&key, base_string.as_bytes()).as_ref())
}

/// Verifies signed LTI 1.1 launches against the tenant registry
#[derive(Clone)]
pub struct OAuth1Verifier {
    tenants: TenantRegistry,
    db: Arc<Database>,
    clock: SharedClock,
}

impl OAuth1Verifier {
    /// Create a verifier
    #[must_use]
    pub const fn new(tenants: TenantRegistry, db: Arc<Database>, clock: SharedClock) -> Self {
        Self { tenants, db, clock }
    }

    /// Verify a launch and return its tenant and parameters
    ///
    /// `form` holds the decoded body pairs; query parameters are read from `url`.
    ///
    /// # Errors
    ///
    /// Returns `LtiOAuth` for an unknown consumer key, unsupported signature
    /// method, bad signature, stale timestamp or replayed nonce.
    pub async fn verify(
        &self,
        method: &str,
        url: &Url,
        form: &[(String, String)],
    ) -> AppResult<(ApplicationInstance, LaunchParams)> {
        let params = LaunchParams::from_pairs(
            url.query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .chain(form.iter().cloned()),
        );
        let require = |name: &str| {
            params
                .get(name)
                .ok_or_else(|| AppError::lti_oauth(format!("Missing {name}")))
        };

        let consumer_key = require(oauth1::CONSUMER_KEY)?;
        let instance = self
            .tenants
            .by_consumer_key(consumer_key)
            .await?
            .ok_or_else(|| AppError::lti_oauth(format!("Unknown consumer key {consumer_key}")))?;
        let shared_secret = instance
            .shared_secret
            .as_deref()
            .ok_or_else(|| AppError::lti_oauth("Tenant has no shared secret"))?;

        if require(oauth1::SIGNATURE_METHOD)? != oauth1::HMAC_SHA1 {
            return Err(AppError::lti_oauth("Unsupported oauth_signature_method"));
        }

        let base_string = signature_base_string(method, url, form);
        let expected = sign_hmac_sha1(&base_string, shared_secret, "");
        let provided = require(oauth1::SIGNATURE)?;
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            warn!(
                application_instance_id = instance.id,
                "OAuth 1.0a signature mismatch"
            );
            debug!(base_string = %base_string, "Signature base string");
            return Err(AppError::lti_oauth("Invalid oauth_signature"));
        }

        let now = self.clock.now();
        let timestamp = check_timestamp(require(oauth1::TIMESTAMP)?, now)?;

        let nonce = require(oauth1::NONCE)?;
        let expires_at = timestamp.max(now) + Duration::seconds(OAUTH1_TIMESTAMP_WINDOW_SECS);
        let scope = format!("{}{consumer_key}", nonce_scopes::LTI11_PREFIX);
        if !self.db.record_nonce(&scope, nonce, expires_at, now).await? {
            warn!(
                application_instance_id = instance.id,
                "OAuth 1.0a nonce replayed"
            );
            return Err(AppError::lti_oauth("oauth_nonce already used"));
        }

        Ok((instance, params))
    }
}

fn check_timestamp(raw: &str, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    let seconds: i64 = raw
        .parse()
        .map_err(|_| AppError::lti_oauth("oauth_timestamp is not an integer"))?;
    let timestamp = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| AppError::lti_oauth("oauth_timestamp out of range"))?;
    if (now - timestamp).num_seconds().abs() > OAUTH1_TIMESTAMP_WINDOW_SECS {
        return Err(AppError::lti_oauth("oauth_timestamp outside the accepted window"));
    }
    Ok(timestamp)
}
