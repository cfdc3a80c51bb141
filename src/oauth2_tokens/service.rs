// ABOUTME: OAuth2 token service: read, save, authorization-code exchange and single-flight refresh
// ABOUTME: Refresh is serialized on a per-row advisory lock and bounded by a hard deadline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::constants::limits::OAUTH2_REFRESH_DEADLINE_SECS;
use crate::constants::oauth2::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, INVALID_GRANT};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::models::{LockType, OAuth2Service, OAuth2Token, OAuth2TokenUpdate};

use super::endpoints::{ClientAuth, OAuth2Endpoints};

/// Whose token is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenOwner {
    /// Tenant
    pub application_instance_id: i64,
    /// Local user id
    pub user_id: i64,
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Refresh token, when issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when given
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// OAuth2 token store and refresher
#[derive(Clone)]
pub struct OAuth2TokenService {
    db: Arc<Database>,
    http: reqwest::Client,
    clock: SharedClock,
}

fn reauthorize(service: OAuth2Service, message: impl Into<String>) -> AppError {
    AppError::oauth2_token(service.as_str(), &service.authorize_route(), false, message)
}

impl OAuth2TokenService {
    /// Create the service
    #[must_use]
    pub const fn new(db: Arc<Database>, http: reqwest::Client, clock: SharedClock) -> Self {
        Self { db, http, clock }
    }

    /// Stored token of `owner` for `service`
    ///
    /// # Errors
    ///
    /// Returns `OAuth2Token` (re-authorize) when no token is stored.
    pub async fn get(&self, owner: TokenOwner, service: OAuth2Service) -> AppResult<OAuth2Token> {
        self.db
            .get_oauth2_token(owner.application_instance_id, owner.user_id, service)
            .await?
            .ok_or_else(|| reauthorize(service, format!("No {service} token stored for user")))
    }

    /// Persist a token response; an absent refresh token keeps the stored one
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn save(
        &self,
        owner: TokenOwner,
        service: OAuth2Service,
        response: &TokenResponse,
    ) -> AppResult<OAuth2Token> {
        let saved = self
            .db
            .save_oauth2_token(&OAuth2TokenUpdate {
                application_instance_id: owner.application_instance_id,
                user_id: owner.user_id,
                service,
                access_token: response.access_token.clone(),
                refresh_token: response.refresh_token.clone(),
                expires_in: response.expires_in,
                received_at: self.clock.now(),
            })
            .await?;

        if let (Some(previous), Some(new)) =
            (&saved.previous_refresh_token, &response.refresh_token)
        {
            if previous != new {
                warn!(
                    application_instance_id = owner.application_instance_id,
                    user_id = owner.user_id,
                    %service,
                    "OAuth2 refresh token rotated by the LMS"
                );
            }
        }
        Ok(saved.token)
    }

    /// Exchange an authorization code and store the result
    ///
    /// # Errors
    ///
    /// Returns `OAuth2Token` when the server rejects the grant and
    /// `ExternalRequest` for other upstream failures.
    pub async fn get_access_token(
        &self,
        owner: TokenOwner,
        endpoints: &OAuth2Endpoints,
        code: &str,
    ) -> AppResult<String> {
        let response = self
            .request_token(
                endpoints,
                &[
                    ("grant_type", GRANT_AUTHORIZATION_CODE),
                    ("code", code),
                    ("redirect_uri", endpoints.redirect_uri.as_str()),
                ],
            )
            .await?;
        let token = self.save(owner, endpoints.service, &response).await?;
        info!(
            application_instance_id = owner.application_instance_id,
            user_id = owner.user_id,
            service = %endpoints.service,
            "OAuth2 authorization completed"
        );
        Ok(token.access_token)
    }

    /// Refresh the stored access token
    ///
    /// A token received within the skip window is returned as is. Otherwise
    /// the refresh runs under the row's advisory lock; when the lock is held
    /// elsewhere the call fails with `ConcurrentTokenRefresh` if
    /// `prevent_concurrent` is set and refreshes unlocked otherwise.
    ///
    /// # Errors
    ///
    /// - `OAuth2Token` when no token or refresh token is stored, or the
    ///   server answers `invalid_grant` (the stored row is left untouched)
    /// - `ConcurrentTokenRefresh` when another worker holds the lock
    /// - `ExternalRequest` for other upstream failures or the deadline
    pub async fn refresh_access_token(
        &self,
        owner: TokenOwner,
        endpoints: &OAuth2Endpoints,
        prevent_concurrent: bool,
    ) -> AppResult<String> {
        let service = endpoints.service;
        let token = self.get(owner, service).await?;
        if token.is_current(self.clock.now()) {
            debug!(token_id = token.id, "OAuth2 token is current; skipping refresh");
            return Ok(token.access_token);
        }

        let lock = self
            .db
            .try_advisory_lock(LockType::OAuth2TokenRefresh, token.id)
            .await?;
        if lock.is_none() {
            if prevent_concurrent {
                return Err(AppError::concurrent_token_refresh(format!(
                    "Token {} is being refreshed by another worker",
                    token.id
                )));
            }
            debug!(token_id = token.id, "Refreshing without the advisory lock");
        }

        // another worker may have finished between our read and the lock
        let token = self.get(owner, service).await?;
        if token.is_current(self.clock.now()) {
            if let Some(lock) = lock {
                lock.release().await?;
            }
            return Ok(token.access_token);
        }
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| reauthorize(service, "No refresh token stored"))?;

        let deadline = Duration::from_secs(OAUTH2_REFRESH_DEADLINE_SECS);
        let response = timeout(
            deadline,
            self.request_token(
                endpoints,
                &[
                    ("grant_type", GRANT_REFRESH_TOKEN),
                    ("refresh_token", refresh_token.as_str()),
                    ("redirect_uri", endpoints.redirect_uri.as_str()),
                ],
            ),
        )
        .await
        .map_err(|_| {
            AppError::external_request(
                format!("{service} token refresh exceeded {OAUTH2_REFRESH_DEADLINE_SECS}s"),
                None,
            )
        })??;

        let saved = self.save(owner, service, &response).await?;
        if let Some(lock) = lock {
            lock.release().await?;
        }
        info!(token_id = saved.id, %service, "OAuth2 token refreshed");
        Ok(saved.access_token)
    }

    async fn request_token(
        &self,
        endpoints: &OAuth2Endpoints,
        fields: &[(&str, &str)],
    ) -> AppResult<TokenResponse> {
        let service = endpoints.service;
        let mut form: Vec<(&str, &str)> = fields.to_vec();
        let mut request = self.http.post(endpoints.token_url.clone());
        match endpoints.auth {
            ClientAuth::Basic => {
                request = request.basic_auth(
                    &endpoints.client_id,
                    Some(endpoints.client_secret.as_str()),
                );
            }
            ClientAuth::Body => {
                form.push(("client_id", endpoints.client_id.as_str()));
                form.push(("client_secret", endpoints.client_secret.as_str()));
            }
        }

        let response = request.form(&form).send().await.map_err(|e| {
            AppError::external_request(format!("{service} token endpoint unreachable: {e}"), None)
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::external_request(
                format!("{service} token response unreadable: {e}"),
                Some(status.as_u16()),
            )
        })?;

        if !status.is_success() {
            if serde_json::from_str::<ErrorResponse>(&body)
                .is_ok_and(|error| error.error == INVALID_GRANT)
            {
                warn!(%service, "OAuth2 grant rejected; user must re-authorize");
                return Err(reauthorize(service, "The LMS rejected the stored grant"));
            }
            return Err(AppError::external_request(
                format!("{service} token endpoint returned {status}"),
                Some(status.as_u16()),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            AppError::external_request(
                format!("{service} token response malformed: {e}"),
                Some(status.as_u16()),
            )
        })
    }
}
