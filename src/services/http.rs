// ABOUTME: HTTP wrappers for calls that need an LMS access token
// ABOUTME: 401 becomes a refreshable OAuth2Token error; other failures become ExternalRequest with a correlation id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LTI service HTTP
//!
//! These wrappers never write tokens themselves: reads and refreshes go
//! through [`OAuth2TokenService`] and [`LtiaTokenService`].

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::limits::HTTP_TIMEOUT_SECS;
use crate::errors::{AppError, AppResult};
use crate::failsafe::retry_concurrent_refresh;
use crate::ltia::LtiaTokenService;
use crate::models::{LtiRegistration, OAuth2Service};
use crate::oauth2_tokens::{OAuth2Endpoints, OAuth2TokenService, TokenOwner};

/// Client with the default outbound timeout
///
/// # Errors
///
/// Returns an `Internal` error if the TLS backend cannot initialise.
pub fn build_http_client() -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))
}

/// Plain JSON-over-HTTP calls
#[derive(Clone)]
pub struct HttpService {
    client: reqwest::Client,
}

impl HttpService {
    /// Wrap `client`
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send a request and decode a JSON response
    ///
    /// An empty response body decodes as `null`.
    ///
    /// # Errors
    ///
    /// Returns `ExternalRequest` for transport failures and non-2xx statuses;
    /// the status is kept in the error details.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> AppResult<Value> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            AppError::external_request(format!("{method} {url} failed: {e}"), None)
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_request(
                format!("{method} {url} returned {status}"),
                Some(status.as_u16()),
            ));
        }
        let text = response.text().await.map_err(|e| {
            AppError::external_request(
                format!("{method} {url} body unreadable: {e}"),
                Some(status.as_u16()),
            )
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            AppError::external_request(
                format!("{method} {url} returned invalid JSON: {e}"),
                Some(status.as_u16()),
            )
        })
    }
}

fn unauthorized(error: &AppError) -> bool {
    error.details.upstream_status == Some(StatusCode::UNAUTHORIZED.as_u16())
}

/// Calls to an LMS REST API on behalf of one user
#[derive(Clone)]
pub struct OAuthHttpService {
    http: HttpService,
    tokens: OAuth2TokenService,
    owner: TokenOwner,
    endpoints: OAuth2Endpoints,
}

impl OAuthHttpService {
    /// Bind the service to `owner` and `endpoints`
    #[must_use]
    pub const fn new(
        http: HttpService,
        tokens: OAuth2TokenService,
        owner: TokenOwner,
        endpoints: OAuth2Endpoints,
    ) -> Self {
        Self {
            http,
            tokens,
            owner,
            endpoints,
        }
    }

    fn service(&self) -> OAuth2Service {
        self.endpoints.service
    }

    /// Send a request with the stored access token
    ///
    /// # Errors
    ///
    /// Returns `OAuth2Token` when no token is stored (re-authorize) or the
    /// LMS answers 401 (refreshable), and `ExternalRequest` otherwise.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> AppResult<Value> {
        let token = self.tokens.get(self.owner, self.service()).await?;
        match self
            .http
            .request(method, url, Some(&token.access_token), body)
            .await
        {
            Err(error) if unauthorized(&error) => {
                let service = self.service();
                debug!(%service, "LMS rejected the access token");
                Err(AppError::oauth2_token(
                    service.as_str(),
                    &service.refresh_route(),
                    true,
                    format!("{service} access token was rejected"),
                ))
            }
            other => other,
        }
    }

    /// Refresh the token, retrying briefly when another worker holds the lock
    ///
    /// # Errors
    ///
    /// Propagates [`OAuth2TokenService::refresh_access_token`] errors.
    pub async fn refresh(&self) -> AppResult<String> {
        retry_concurrent_refresh("oauth2_refresh", move || {
            self.tokens
                .refresh_access_token(self.owner, &self.endpoints, true)
        })
        .await
    }
}

/// Calls to LTI Advantage services of one registration
#[derive(Clone)]
pub struct LtiaHttpService {
    http: HttpService,
    tokens: LtiaTokenService,
    registration: LtiRegistration,
}

impl LtiaHttpService {
    /// Bind the service to `registration`
    #[must_use]
    pub const fn new(
        http: HttpService,
        tokens: LtiaTokenService,
        registration: LtiRegistration,
    ) -> Self {
        Self {
            http,
            tokens,
            registration,
        }
    }

    /// Send a request with a client-credentials token for `scopes`
    ///
    /// # Errors
    ///
    /// Returns `ExternalRequest` for token endpoint and service failures.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        scopes: &[&str],
        body: Option<&Value>,
    ) -> AppResult<Value> {
        let token = self.tokens.get_for(&self.registration, scopes).await?;
        self.http
            .request(method, url, Some(&token), body)
            .await
            .inspect_err(|error| {
                if unauthorized(error) {
                    warn!(
                        registration_id = self.registration.id,
                        "LTI Advantage service rejected the access token"
                    );
                }
            })
    }
}
