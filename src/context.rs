// ABOUTME: Dependency bundle handed to every request handler and background task
// ABOUTME: Built once at startup from ServerConfig, a database and a clock
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Server resources
//!
//! Every component that needs the database, the clock or a secret receives
//! it here; nothing reaches for process-global state.

use std::sync::Arc;

use url::Url;

use crate::clock::{SharedClock, SystemClock};
use crate::config::environment::ServerConfig;
use crate::crypto::AesCipher;
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::grant_token::GrantTokenIssuer;
use crate::identity::IdentityDeriver;
use crate::keyset::KeysetManager;
use crate::lti::{IdTokenValidator, JwksCache, LaunchResolver, OAuth1Verifier, OidcLogin};
use crate::ltia::LtiaTokenService;
use crate::oauth2_tokens::{OAuth2StateCodec, OAuth2TokenService};
use crate::services::{build_http_client, HttpService};
use crate::session::SessionManager;
use crate::tenants::TenantRegistry;

/// Shared, cheaply cloneable handles to every service
#[derive(Clone)]
pub struct ServerResources {
    /// Validated environment configuration
    pub config: Arc<ServerConfig>,
    /// Storage backend
    pub database: Arc<Database>,
    /// Time source for every expiry check
    pub clock: SharedClock,
    /// Tenant and registration lookup
    pub tenants: TenantRegistry,
    /// Tool signing keys
    pub keyset: KeysetManager,
    /// Platform key sets, shared by every validator in the process
    pub jwks: Arc<JwksCache>,
    /// LTI 1.1 signature verifier
    pub oauth1: OAuth1Verifier,
    /// LTI 1.3 login initiation
    pub oidc: OidcLogin,
    /// LTI 1.3 `id_token` validator
    pub id_tokens: IdTokenValidator,
    /// Launch context resolver
    pub launches: LaunchResolver,
    /// Identity derivation on launch
    pub identity: IdentityDeriver,
    /// Grant token issuer
    pub grant_tokens: GrantTokenIssuer,
    /// Launch session cookies
    pub sessions: SessionManager,
    /// Per-user LMS OAuth2 tokens
    pub oauth2_tokens: OAuth2TokenService,
    /// OAuth2 `state` codec
    pub oauth2_state: OAuth2StateCodec,
    /// LTI Advantage service tokens
    pub ltia: LtiaTokenService,
    /// Plain JSON HTTP client
    pub http: HttpService,
}

impl ServerResources {
    /// Wire every component around `database`, `clock` and `http_client`
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when a secret or the H settings are unusable.
    pub fn new(
        config: ServerConfig,
        database: Database,
        clock: SharedClock,
        http_client: reqwest::Client,
    ) -> AppResult<Self> {
        let database = Arc::new(database);
        let cipher = AesCipher::new(&config.aes_secret)
            .map_err(|e| AppError::config(format!("AES_SECRET unusable: {e}")))?;
        let tenants = TenantRegistry::new(database.clone(), cipher.clone(), clock.clone());
        let keyset = KeysetManager::new(
            database.clone(),
            cipher,
            clock.clone(),
            config.key_rotation.key_bits,
        );
        let jwks = Arc::new(JwksCache::new(
            http_client.clone(),
            clock.clone(),
            config.jwks_cache,
        ));

        Ok(Self {
            oauth1: OAuth1Verifier::new(tenants.clone(), database.clone(), clock.clone()),
            oidc: OidcLogin::new(tenants.clone(), database.clone(), clock.clone()),
            id_tokens: IdTokenValidator::new(
                tenants.clone(),
                jwks.clone(),
                database.clone(),
                clock.clone(),
            ),
            launches: LaunchResolver::new(tenants.clone(), database.clone(), clock.clone()),
            identity: IdentityDeriver::new(
                database.clone(),
                clock.clone(),
                config.h.authority.clone(),
            ),
            grant_tokens: GrantTokenIssuer::from_config(&config.h, clock.clone())?,
            sessions: SessionManager::new(config.session_cookie_secret.clone(), clock.clone()),
            oauth2_tokens: OAuth2TokenService::new(
                database.clone(),
                http_client.clone(),
                clock.clone(),
            ),
            oauth2_state: OAuth2StateCodec::new(
                config.oauth2_state_secret.clone(),
                database.clone(),
                clock.clone(),
            ),
            ltia: LtiaTokenService::new(
                database.clone(),
                keyset.clone(),
                http_client.clone(),
                clock.clone(),
            ),
            http: HttpService::new(http_client),
            config: Arc::new(config),
            database,
            clock,
            tenants,
            keyset,
            jwks,
        })
    }

    /// Connect to the configured database with the system clock
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or migrated, or
    /// any component fails to initialise.
    pub async fn from_config(config: ServerConfig) -> AppResult<Self> {
        let database = Database::new(&config.database_url).await?;
        let http_client = build_http_client()?;
        Self::new(config, database, Arc::new(SystemClock), http_client)
    }

    /// Base URL for redirect URIs, falling back to `http://localhost:<port>`
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the fallback URL cannot be built.
    pub fn public_base(&self) -> AppResult<Url> {
        if let Some(url) = self.config.public_base() {
            return Ok(url.clone());
        }
        Url::parse(&format!("http://localhost:{}", self.config.http_port))
            .map_err(|e| AppError::config(format!("Cannot build base URL: {e}")))
    }
}
