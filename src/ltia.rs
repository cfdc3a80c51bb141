// ABOUTME: LTI Advantage service tokens via the JWT-bearer client-credentials grant
// ABOUTME: Signs client assertions with the rotating keyset and caches tokens per registration and scope set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Outbound signer
//!
//! Tokens are cached in `jwt_oauth2_tokens` under the normalized scope
//! string. A miss first queues behind other callers in this process for the
//! same `(registration, scopes)`, then takes a blocking advisory lock on it
//! and re-reads before fetching, so concurrent callers for the same key make
//! one network call between them and at most one of them per process waits
//! on the database lock.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::constants::limits::CLIENT_ASSERTION_TTL_SECS;
use crate::constants::oauth2::{CLIENT_ASSERTION_TYPE_JWT_BEARER, GRANT_CLIENT_CREDENTIALS};
use crate::crypto::{jws_sign, SigningKey};
use crate::database_plugins::factory::Database;
use crate::database_plugins::{lock_key_for, DatabaseProvider};
use crate::errors::{AppError, AppResult};
use crate::keyset::KeysetManager;
use crate::models::{normalize_scopes, LockType, LtiRegistration};

/// Lifetime assumed when the platform omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Claims of the self-issued client assertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Client id of the registration
    pub iss: String,
    /// Client id of the registration
    pub sub: String,
    /// Platform token endpoint
    pub aud: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Random assertion id
    pub jti: String,
}

#[derive(Deserialize)]
struct ClientCredentialsResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Obtains access tokens for LTI Advantage services
#[derive(Clone)]
pub struct LtiaTokenService {
    db: Arc<Database>,
    keyset: KeysetManager,
    http: reqwest::Client,
    clock: SharedClock,
    inflight: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl LtiaTokenService {
    /// Create the service
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        keyset: KeysetManager,
        http: reqwest::Client,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            keyset,
            http,
            clock,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Signed JWT-bearer assertion for `registration`
    ///
    /// # Errors
    ///
    /// Returns an error when no signing key is available or signing fails.
    pub async fn client_assertion(&self, registration: &LtiRegistration) -> AppResult<String> {
        let signer = self.keyset.current_signer().await?;
        let now = self.clock.now();
        let claims = ClientAssertionClaims {
            iss: registration.client_id.clone(),
            sub: registration.client_id.clone(),
            aud: registration.token_url.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(CLIENT_ASSERTION_TTL_SECS)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        Ok(jws_sign(
            &claims,
            &SigningKey::RsaPem(&signer.private_key_pem),
            Some(signer.kid.as_str()),
        )?)
    }

    /// Access token for `scopes`, cached until a minute before expiry
    ///
    /// # Errors
    ///
    /// Returns `ExternalRequest` when the platform token endpoint fails and
    /// propagates signing and database errors.
    pub async fn get_for<S: AsRef<str> + Sync>(
        &self,
        registration: &LtiRegistration,
        scopes: &[S],
    ) -> AppResult<String> {
        let scopes = normalize_scopes(scopes);
        if let Some(token) = self.cached(registration.id, &scopes).await? {
            return Ok(token);
        }

        let key = lock_key_for(&[registration.id.to_string().as_str(), scopes.as_str()]);
        let slot = Arc::clone(self.inflight.entry(key).or_default().value());
        let _queued = slot.lock().await;
        if let Some(token) = self.cached(registration.id, &scopes).await? {
            return Ok(token);
        }

        let lock = self
            .db
            .advisory_lock(LockType::JwtOAuth2TokenRefresh, key)
            .await?;
        if let Some(token) = self.cached(registration.id, &scopes).await? {
            lock.release().await?;
            return Ok(token);
        }

        let response = self.request_token(registration, &scopes).await?;
        let now = self.clock.now();
        let expires_at =
            now + Duration::seconds(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        let token = self
            .db
            .save_jwt_oauth2_token(
                registration.id,
                &scopes,
                &response.access_token,
                expires_at,
                now,
            )
            .await?;
        lock.release().await?;

        info!(
            registration_id = registration.id,
            scopes = %scopes,
            "Fetched LTI Advantage access token"
        );
        Ok(token.access_token)
    }

    async fn cached(&self, registration_id: i64, scopes: &str) -> AppResult<Option<String>> {
        let now = self.clock.now();
        Ok(self
            .db
            .get_jwt_oauth2_token(registration_id, scopes)
            .await?
            .filter(|token| token.is_valid(now))
            .map(|token| {
                debug!(registration_id, "Using cached LTI Advantage token");
                token.access_token
            }))
    }

    async fn request_token(
        &self,
        registration: &LtiRegistration,
        scopes: &str,
    ) -> AppResult<ClientCredentialsResponse> {
        let assertion = self.client_assertion(registration).await?;
        let response = self
            .http
            .post(&registration.token_url)
            .form(&[
                ("grant_type", GRANT_CLIENT_CREDENTIALS),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER),
                ("client_assertion", assertion.as_str()),
                ("scope", scopes),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::external_request(format!("LTI token endpoint unreachable: {e}"), None)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_request(
                format!(
                    "LTI token endpoint of registration {} returned {status}",
                    registration.id
                ),
                Some(status.as_u16()),
            ));
        }
        response.json().await.map_err(|e| {
            AppError::external_request(
                format!("LTI token response malformed: {e}"),
                Some(status.as_u16()),
            )
        })
    }
}
