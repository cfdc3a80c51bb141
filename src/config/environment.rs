// ABOUTME: Environment-driven server configuration with validation
// ABOUTME: H service credentials, secrets, JWKS cache and key rotation policy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Server configuration
//!
//! Configuration comes only from the process environment. Required values
//! abort bootstrap with a `Config` error; everything else has a default.

use std::env;
use std::fmt;
use std::str::FromStr;

use url::Url;
use zeroize::Zeroizing;

use crate::constants::key_rotation;
use crate::errors::{AppError, AppResult};
use crate::logging::LogFormat;

/// Companion annotation service ("h") settings
#[derive(Clone)]
pub struct HConfig {
    /// Authority suffix for user and group ids
    pub authority: String,
    /// Public URL of the H API; its hostname is the grant token audience
    pub api_url_public: Url,
    /// Issuer of grant tokens
    pub jwt_client_id: String,
    /// HS256 secret shared with H
    pub jwt_client_secret: Zeroizing<String>,
}

impl HConfig {
    /// Hostname of the public API URL
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the URL has no host.
    pub fn api_hostname(&self) -> AppResult<String> {
        self.api_url_public
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| AppError::config("H_API_URL_PUBLIC has no host"))
    }
}

impl fmt::Debug for HConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HConfig")
            .field("authority", &self.authority)
            .field("api_url_public", &self.api_url_public.as_str())
            .field("jwt_client_id", &self.jwt_client_id)
            .finish_non_exhaustive()
    }
}

/// Platform JWKS cache lifetimes
#[derive(Debug, Clone, Copy)]
pub struct JwksCacheConfig {
    /// Lifetime of a successfully fetched key set
    pub ttl_secs: i64,
    /// Lifetime of a remembered fetch failure
    pub negative_ttl_secs: i64,
    /// How long past expiry a key set may still be served when refetching fails
    pub stale_grace_secs: i64,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            negative_ttl_secs: 30,
            stale_grace_secs: 600,
        }
    }
}

/// RSA keyset rotation policy
#[derive(Debug, Clone, Copy)]
pub struct KeyRotationConfig {
    /// Non-expired keys to keep
    pub target_keys: usize,
    /// Keys older than this are expired
    pub max_age_hours: i64,
    /// Expired keys older than this are deleted
    pub max_expired_age_hours: i64,
    /// Period of the background rotation task
    pub interval_secs: u64,
    /// Modulus size of generated keys
    pub key_bits: usize,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            target_keys: key_rotation::TARGET_KEYS,
            max_age_hours: key_rotation::MAX_AGE_HOURS,
            max_expired_age_hours: key_rotation::MAX_EXPIRED_AGE_HOURS,
            interval_secs: key_rotation::INTERVAL_SECS,
            key_bits: key_rotation::RSA_KEY_BITS,
        }
    }
}

/// Complete server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Listening port
    pub http_port: u16,
    /// sqlx connection URL
    pub database_url: String,
    /// Externally visible base URL, used for OAuth 1 base strings and redirect URIs
    pub public_url: Option<Url>,
    /// H service settings
    pub h: HConfig,
    /// 32-byte key for AES-CFB secrets at rest
    pub aes_secret: Zeroizing<Vec<u8>>,
    /// HS256 secret for the session cookie
    pub session_cookie_secret: Zeroizing<String>,
    /// HS256 secret for OAuth2 `state` values
    pub oauth2_state_secret: Zeroizing<String>,
    /// Origins allowed to call `/api/*` from the browser
    pub rpc_allowed_origins: Vec<String>,
    /// JWKS cache lifetimes
    pub jwks_cache: JwksCacheConfig,
    /// Key rotation policy
    pub key_rotation: KeyRotationConfig,
    /// Log line format
    pub log_format: LogFormat,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_port", &self.http_port)
            .field("public_url", &self.public_url.as_ref().map(Url::as_str))
            .field("h", &self.h)
            .field("rpc_allowed_origins", &self.rpc_allowed_origins)
            .field("jwks_cache", &self.jwks_cache)
            .field("key_rotation", &self.key_rotation)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load from the process environment
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when a required variable is missing or any
    /// value fails validation.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when a required variable is missing or any
    /// value fails validation.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::config(format!("{key} must be set")))
        };

        let aes_secret = required("AES_SECRET")?.into_bytes();
        if aes_secret.len() != 32 {
            return Err(AppError::config(format!(
                "AES_SECRET must be exactly 32 bytes, got {}",
                aes_secret.len()
            )));
        }

        let api_url_public = parse_url("H_API_URL_PUBLIC", &required("H_API_URL_PUBLIC")?)?;
        if api_url_public.host_str().is_none() {
            return Err(AppError::config("H_API_URL_PUBLIC has no host"));
        }

        let public_url = lookup("PUBLIC_URL")
            .filter(|value| !value.is_empty())
            .map(|value| parse_url("PUBLIC_URL", &value))
            .transpose()?;

        let defaults = KeyRotationConfig::default();
        let jwks_defaults = JwksCacheConfig::default();

        Ok(Self {
            http_port: parse_or(&lookup, "HTTP_PORT", 8001)?,
            database_url: required("DATABASE_URL")?,
            public_url,
            h: HConfig {
                authority: required("H_AUTHORITY")?,
                api_url_public,
                jwt_client_id: required("H_JWT_CLIENT_ID")?,
                jwt_client_secret: Zeroizing::new(required("H_JWT_CLIENT_SECRET")?),
            },
            aes_secret: Zeroizing::new(aes_secret),
            session_cookie_secret: Zeroizing::new(required("SESSION_COOKIE_SECRET")?),
            oauth2_state_secret: Zeroizing::new(required("OAUTH2_STATE_SECRET")?),
            rpc_allowed_origins: lookup("RPC_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            jwks_cache: JwksCacheConfig {
                ttl_secs: parse_or(&lookup, "JWKS_CACHE_TTL_SECS", jwks_defaults.ttl_secs)?,
                negative_ttl_secs: parse_or(
                    &lookup,
                    "JWKS_NEGATIVE_TTL_SECS",
                    jwks_defaults.negative_ttl_secs,
                )?,
                stale_grace_secs: jwks_defaults.stale_grace_secs,
            },
            key_rotation: KeyRotationConfig {
                target_keys: parse_or(&lookup, "KEY_ROTATION_TARGET", defaults.target_keys)?,
                max_age_hours: parse_or(
                    &lookup,
                    "KEY_ROTATION_MAX_AGE_HOURS",
                    defaults.max_age_hours,
                )?,
                max_expired_age_hours: parse_or(
                    &lookup,
                    "KEY_ROTATION_MAX_EXPIRED_AGE_HOURS",
                    defaults.max_expired_age_hours,
                )?,
                interval_secs: parse_or(
                    &lookup,
                    "KEY_ROTATION_INTERVAL_SECS",
                    defaults.interval_secs,
                )?,
                key_bits: parse_or(&lookup, "RSA_KEY_BITS", defaults.key_bits)?,
            },
            log_format: lookup("LOG_FORMAT")
                .map(|value| LogFormat::from_str_or_default(&value))
                .unwrap_or_default(),
        })
    }

    /// Base URL used to rebuild request URLs, when configured
    #[must_use]
    pub fn public_base(&self) -> Option<&Url> {
        self.public_url.as_ref()
    }
}

fn parse_url(key: &str, value: &str) -> AppResult<Url> {
    Url::parse(value).map_err(|e| AppError::config(format!("{key} is not a valid URL: {e}")))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).filter(|value| !value.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|e| AppError::config(format!("{key} is invalid: {e}"))),
        None => Ok(default),
    }
}
