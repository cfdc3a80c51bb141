// ABOUTME: HS256-signed OAuth2 authorization state binding the redirect to a user, tenant and service
// ABOUTME: Ten minute lifetime, single use, and redeemable only by the session that started authorization
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt::Display;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::SharedClock;
use crate::constants::limits::OAUTH2_STATE_TTL_SECS;
use crate::constants::nonce_scopes;
use crate::crypto::{check_time_claims, hs256_verify, jws_sign, SigningKey};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::models::OAuth2Service;
use crate::session::SessionClaims;

/// Contents of the `state` parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2StateClaims {
    /// User the token will be stored for
    pub user_id: i64,
    /// Tenant the token will be stored for
    pub application_instance_id: i64,
    /// LMS API being authorized
    pub service: OAuth2Service,
    /// Random per-redirect value, recorded until the callback redeems it
    pub jti: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// Signs, records and redeems `state` values
#[derive(Clone)]
pub struct OAuth2StateCodec {
    secret: Zeroizing<String>,
    db: Arc<Database>,
    clock: SharedClock,
}

fn invalid(reason: impl Display) -> AppError {
    AppError::invalid_input(format!("Invalid OAuth2 state: {reason}"))
}

impl OAuth2StateCodec {
    /// Create a codec signing with `secret`
    #[must_use]
    pub const fn new(secret: Zeroizing<String>, db: Arc<Database>, clock: SharedClock) -> Self {
        Self { secret, db, clock }
    }

    /// Signed state for an authorization redirect started by `session`
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if signing fails, or a database error if the
    /// state cannot be recorded.
    pub async fn encode(
        &self,
        session: &SessionClaims,
        service: OAuth2Service,
    ) -> AppResult<String> {
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(OAUTH2_STATE_TTL_SECS);
        let claims = OAuth2StateClaims {
            user_id: session.user_id,
            application_instance_id: session.application_instance_id,
            service,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let state = jws_sign(&claims, &SigningKey::Hmac(self.secret.as_bytes()), None)?;
        self.db
            .record_nonce(nonce_scopes::OAUTH2_STATE, &claims.jti, expires_at, now)
            .await?;
        Ok(state)
    }

    /// Verify a state's signature, expiry and service without redeeming it
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` error for a forged, expired or foreign state.
    pub fn decode(&self, state: &str, service: OAuth2Service) -> AppResult<OAuth2StateClaims> {
        let claims = hs256_verify(state, self.secret.as_bytes()).map_err(invalid)?;
        check_time_claims(&claims, self.clock.now(), 0, true).map_err(invalid)?;
        let claims: OAuth2StateClaims = serde_json::from_value(claims).map_err(invalid)?;
        if claims.service != service {
            return Err(invalid(format_args!("issued for {}", claims.service)));
        }
        Ok(claims)
    }

    /// Redeem a state returned to the callback in the browser of `session`
    ///
    /// A state is accepted once, and only from the session that requested it.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` error for a forged, expired, foreign,
    /// replayed or other-session state.
    pub async fn redeem(
        &self,
        state: &str,
        service: OAuth2Service,
        session: &SessionClaims,
    ) -> AppResult<OAuth2StateClaims> {
        let claims = self.decode(state, service)?;
        if claims.user_id != session.user_id
            || claims.application_instance_id != session.application_instance_id
        {
            warn!(
                %service,
                state_user_id = claims.user_id,
                session_user_id = session.user_id,
                "OAuth2 state presented by a different session"
            );
            return Err(invalid("not issued to this session"));
        }
        let now = self.clock.now();
        if !self
            .db
            .consume_nonce(nonce_scopes::OAUTH2_STATE, &claims.jti, now)
            .await?
        {
            return Err(invalid("already used"));
        }
        Ok(claims)
    }
}
