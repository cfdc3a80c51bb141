// ABOUTME: Per-service OAuth2 endpoint resolution from tenant settings and LMS URL
// ABOUTME: Token, authorization and redirect URLs plus client credentials and how to present them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

use url::Url;
use zeroize::Zeroizing;

use crate::crypto::AesCipher;
use crate::errors::{AppError, AppResult};
use crate::models::{ApplicationInstance, OAuth2Service};
use crate::tenants::settings::{
    ApplicationSettings, BlackboardSettings, CanvasSettings, CanvasStudioSettings, D2lSettings,
};

const D2L_TOKEN_URL: &str = "https://auth.brightspace.com/core/connect/token";
const D2L_AUTHORIZE_URL: &str = "https://auth.brightspace.com/oauth2/auth";

/// How client credentials reach the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic`
    Basic,
    /// `client_id` / `client_secret` form fields
    Body,
}

/// Everything needed to talk to one service's OAuth2 server
#[derive(Clone)]
pub struct OAuth2Endpoints {
    /// LMS API
    pub service: OAuth2Service,
    /// Token endpoint
    pub token_url: Url,
    /// Authorization endpoint
    pub authorize_url: Url,
    /// Callback registered with the LMS
    pub redirect_uri: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: Zeroizing<String>,
    /// How client credentials are sent
    pub auth: ClientAuth,
}

impl fmt::Debug for OAuth2Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Endpoints")
            .field("service", &self.service)
            .field("token_url", &self.token_url.as_str())
            .field("authorize_url", &self.authorize_url.as_str())
            .field("redirect_uri", &self.redirect_uri)
            .field("client_id", &self.client_id)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

fn not_configured(service: OAuth2Service, what: &str) -> AppError {
    AppError::serializable(
        "oauth2_client_not_configured",
        format!("{what} is not configured for {service} on this installation"),
    )
}

fn join(base: &str, path: &str) -> AppResult<Url> {
    Url::parse(base)
        .and_then(|base| base.join(path))
        .map_err(|e| AppError::config(format!("Cannot build OAuth2 URL from {base}: {e}")))
}

fn credentials(
    service: OAuth2Service,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> AppResult<(String, Zeroizing<String>)> {
    let client_id = client_id.ok_or_else(|| not_configured(service, "Client id"))?;
    let client_secret = client_secret.ok_or_else(|| not_configured(service, "Client secret"))?;
    Ok((client_id, Zeroizing::new(client_secret)))
}

impl OAuth2Endpoints {
    /// Endpoints of `service` for `instance`
    ///
    /// `public_base` is the externally visible base URL of this tool; the
    /// redirect URI is the service's callback path under it.
    ///
    /// # Errors
    ///
    /// Returns a `Serializable` error naming what is missing when the tenant
    /// has no client credentials or LMS URL for the service.
    pub fn resolve(
        service: OAuth2Service,
        instance: &ApplicationInstance,
        settings: &ApplicationSettings,
        cipher: &AesCipher,
        public_base: &Url,
    ) -> AppResult<Self> {
        let redirect_uri = public_base
            .join(&service.callback_path())
            .map_err(|e| AppError::config(format!("Invalid public URL: {e}")))?
            .to_string();
        let lms_url = || {
            instance
                .lms_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| not_configured(service, "LMS URL"))
        };

        let (token_url, authorize_url, (client_id, client_secret), auth) = match service {
            OAuth2Service::Canvas => {
                let group = settings.group::<CanvasSettings>(cipher)?;
                (
                    join(lms_url()?, "/login/oauth2/token")?,
                    join(lms_url()?, "/login/oauth2/auth")?,
                    credentials(service, group.developer_key, group.developer_secret)?,
                    ClientAuth::Body,
                )
            }
            OAuth2Service::CanvasStudio => {
                let group = settings.group::<CanvasStudioSettings>(cipher)?;
                let domain = group
                    .domain
                    .ok_or_else(|| not_configured(service, "Canvas Studio domain"))?;
                let base = format!("https://{domain}");
                (
                    join(&base, "/api/public/oauth/token")?,
                    join(&base, "/api/public/oauth/authorize")?,
                    credentials(service, group.client_id, group.client_secret)?,
                    ClientAuth::Basic,
                )
            }
            OAuth2Service::Blackboard => {
                let group = settings.group::<BlackboardSettings>(cipher)?;
                (
                    join(lms_url()?, "/learn/api/public/v1/oauth2/token")?,
                    join(lms_url()?, "/learn/api/public/v1/oauth2/authorizationcode")?,
                    credentials(service, group.client_id, group.client_secret)?,
                    ClientAuth::Basic,
                )
            }
            OAuth2Service::D2l => {
                let group = settings.group::<D2lSettings>(cipher)?;
                (
                    join(D2L_TOKEN_URL, "")?,
                    join(D2L_AUTHORIZE_URL, "")?,
                    credentials(service, group.client_id, group.client_secret)?,
                    ClientAuth::Body,
                )
            }
        };

        Ok(Self {
            service,
            token_url,
            authorize_url,
            redirect_uri,
            client_id,
            client_secret,
            auth,
        })
    }

    /// Authorization redirect carrying `state`
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        url
    }
}
