// ABOUTME: OIDC third-party login initiation for LTI 1.3 launches
// ABOUTME: Resolves the registration, persists state and nonce, and builds the platform authorization redirect
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::clock::SharedClock;
use crate::constants::limits::OIDC_NONCE_TTL_SECS;
use crate::constants::nonce_scopes;
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult, Lti13ErrorKind};
use crate::tenants::TenantRegistry;

/// Parameters of a platform-initiated login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcLoginRequest {
    /// Platform issuer
    #[serde(default)]
    pub iss: String,
    /// Opaque platform user hint, echoed back
    #[serde(default)]
    pub login_hint: String,
    /// Where the launch should land
    #[serde(default)]
    pub target_link_uri: Option<String>,
    /// Opaque platform message hint, echoed back
    #[serde(default)]
    pub lti_message_hint: Option<String>,
    /// OAuth2 client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// Deployment the login is for
    #[serde(default)]
    pub lti_deployment_id: Option<String>,
    /// Launch message type
    #[serde(default)]
    pub lti_message_type: Option<String>,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// OIDC login initiation
#[derive(Clone)]
pub struct OidcLogin {
    tenants: TenantRegistry,
    db: Arc<Database>,
    clock: SharedClock,
}

impl OidcLogin {
    /// Create the login handler
    #[must_use]
    pub const fn new(tenants: TenantRegistry, db: Arc<Database>, clock: SharedClock) -> Self {
        Self { tenants, db, clock }
    }

    /// Build the redirect to the platform authorization endpoint
    ///
    /// `default_redirect_uri` is used when the platform sent no
    /// `target_link_uri`.
    ///
    /// # Errors
    ///
    /// Returns an `Lti13` error of kind `UnknownRegistration` when no
    /// registration matches, `Claims` when `login_hint` is missing, and a
    /// `Config` error when the stored login URL is invalid.
    pub async fn initiate(
        &self,
        request: &OidcLoginRequest,
        default_redirect_uri: &str,
    ) -> AppResult<Url> {
        if request.login_hint.is_empty() {
            return Err(AppError::lti13(Lti13ErrorKind::Claims, "login_hint is required"));
        }
        let client_id = request.client_id.as_deref().filter(|id| !id.is_empty());
        let registration = self
            .tenants
            .registration(&request.iss, client_id)
            .await?
            .ok_or_else(|| {
                AppError::lti13(
                    Lti13ErrorKind::UnknownRegistration,
                    format!("No registration for issuer {}", request.iss),
                )
            })?;

        let now = self.clock.now();
        let expires_at = now + Duration::seconds(OIDC_NONCE_TTL_SECS);
        let state = random_token();
        let nonce = random_token();
        self.db
            .record_nonce(nonce_scopes::OIDC_STATE, &state, expires_at, now)
            .await?;
        self.db
            .record_nonce(
                &format!("{}{}", nonce_scopes::LTI13_PREFIX, registration.id),
                &nonce,
                expires_at,
                now,
            )
            .await?;

        let mut redirect = Url::parse(&registration.auth_login_url).map_err(|e| {
            AppError::config(format!(
                "Registration {} has an invalid auth_login_url: {e}",
                registration.id
            ))
        })?;
        let redirect_uri = request
            .target_link_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(default_redirect_uri);
        {
            let mut query = redirect.query_pairs_mut();
            query
                .append_pair("response_type", "id_token")
                .append_pair("response_mode", "form_post")
                .append_pair("scope", "openid")
                .append_pair("prompt", "none")
                .append_pair("client_id", &registration.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("login_hint", &request.login_hint)
                .append_pair("state", &state)
                .append_pair("nonce", &nonce);
            if let Some(hint) = &request.lti_message_hint {
                query.append_pair("lti_message_hint", hint);
            }
        }

        info!(
            registration_id = registration.id,
            issuer = %registration.issuer,
            "OIDC login initiated"
        );
        Ok(redirect)
    }
}
