// ABOUTME: Short-lived HS256 grant tokens the annotation client exchanges for API credentials
// ABOUTME: Claims bound to the derived h_userid with the public API hostname as audience
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::Duration;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::clock::SharedClock;
use crate::config::environment::HConfig;
use crate::constants::limits::GRANT_TOKEN_TTL_SECS;
use crate::crypto::{check_time_claims, hs256_verify, jws_sign, JwsError, SigningKey};
use crate::errors::{AppError, AppResult};

/// Grant token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTokenClaims {
    /// Configured JWT client id
    pub iss: String,
    /// `h_userid`
    pub sub: String,
    /// Hostname of the public annotation API
    pub aud: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Not before, seconds since the epoch
    pub nbf: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// Mints grant tokens
#[derive(Clone)]
pub struct GrantTokenIssuer {
    client_id: String,
    secret: Zeroizing<String>,
    audience: String,
    clock: SharedClock,
}

impl GrantTokenIssuer {
    /// Create an issuer for the configured annotation service
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the public API URL has no host.
    pub fn from_config(config: &HConfig, clock: SharedClock) -> AppResult<Self> {
        Ok(Self {
            client_id: config.jwt_client_id.clone(),
            secret: config.jwt_client_secret.clone(),
            audience: config.api_hostname()?,
            clock,
        })
    }

    /// Token for `h_userid`, valid for five minutes
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if signing fails.
    pub fn issue(&self, h_userid: &str) -> AppResult<String> {
        let now = self.clock.now();
        let claims = GrantTokenClaims {
            iss: self.client_id.clone(),
            sub: h_userid.to_owned(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + Duration::seconds(GRANT_TOKEN_TTL_SECS)).timestamp(),
        };
        Ok(jws_sign(
            &claims,
            &SigningKey::Hmac(self.secret.as_bytes()),
            None,
        )?)
    }

    /// Verify a token minted with the shared secret
    ///
    /// # Errors
    ///
    /// Returns a `Signature` error for a bad signature, elapsed `exp`, or a
    /// foreign issuer or audience.
    pub fn verify(&self, token: &str) -> AppResult<GrantTokenClaims> {
        let rejected = |e: JwsError| AppError::signature(format!("Invalid grant token: {e}"));
        let claims = hs256_verify(token, self.secret.as_bytes()).map_err(rejected)?;
        check_time_claims(&claims, self.clock.now(), 0, true).map_err(rejected)?;
        let claims: GrantTokenClaims = serde_json::from_value(claims)
            .map_err(|e| AppError::signature(format!("Malformed grant token claims: {e}")))?;
        if claims.iss != self.client_id || claims.aud != self.audience {
            return Err(AppError::signature("Grant token issued for another party"));
        }
        Ok(claims)
    }
}
