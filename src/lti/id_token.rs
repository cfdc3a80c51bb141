// ABOUTME: LTI 1.3 launch validation: OIDC state, id_token signature against the platform JWKS, claims
// ABOUTME: Each failed check maps to an Lti13ErrorKind that is logged but never rendered
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # `id_token` validator
//!
//! Order of checks: `state`, header, registration, JWKS, signature, `iss`,
//! `aud`, `azp`, time claims, `nonce`, deployment. The nonce is consumed only
//! after every cryptographic and claim check has passed, so a forged token
//! cannot burn a legitimate nonce.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode_header, Algorithm};
use serde_json::Value;
use tracing::warn;

use crate::clock::SharedClock;
use crate::constants::limits::ID_TOKEN_LEEWAY_SECS;
use crate::constants::{claims, nonce_scopes};
use crate::crypto::{check_time_claims, jws_verify, JwsError};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult, Lti13ErrorKind};
use crate::models::{ApplicationInstance, LtiRegistration};
use crate::tenants::TenantRegistry;

use super::jwks_cache::JwksCache;

/// Outcome of a successful validation
#[derive(Debug, Clone)]
pub struct ValidatedIdToken {
    /// Registration that issued the token
    pub registration: LtiRegistration,
    /// Tenant addressed by the deployment claim
    pub instance: ApplicationInstance,
    /// Verified claims
    pub claims: Value,
}

/// Validates LTI 1.3 launches
#[derive(Clone)]
pub struct IdTokenValidator {
    tenants: TenantRegistry,
    jwks: Arc<JwksCache>,
    db: Arc<Database>,
    clock: SharedClock,
}

fn fail(kind: Lti13ErrorKind, message: impl Into<String>) -> AppError {
    AppError::lti13(kind, message)
}

/// Claims of `token` without signature verification, used only to pick the registration
fn unverified_claims(token: &str) -> AppResult<Value> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| fail(Lti13ErrorKind::Header, "id_token is not a compact JWS"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| fail(Lti13ErrorKind::Header, format!("id_token payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| fail(Lti13ErrorKind::Claims, format!("id_token payload: {e}")))
}

fn audiences(claims_json: &Value) -> Vec<&str> {
    match claims_json.get("aud") {
        Some(Value::String(aud)) => vec![aud.as_str()],
        Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn classify_jws_error(error: JwsError) -> AppError {
    match error {
        JwsError::MissingKid | JwsError::AlgorithmNotAllowed(_) | JwsError::Malformed(_) => {
            fail(Lti13ErrorKind::Header, error.to_string())
        }
        JwsError::UnknownKey(_) | JwsError::InvalidKey(_) => {
            fail(Lti13ErrorKind::Jwks, error.to_string())
        }
        JwsError::InvalidSignature => fail(Lti13ErrorKind::Signature, error.to_string()),
        JwsError::Expired => fail(Lti13ErrorKind::Expired, error.to_string()),
        JwsError::NotYetValid => fail(Lti13ErrorKind::IssuedInFuture, error.to_string()),
    }
}

impl IdTokenValidator {
    /// Create a validator
    #[must_use]
    pub const fn new(
        tenants: TenantRegistry,
        jwks: Arc<JwksCache>,
        db: Arc<Database>,
        clock: SharedClock,
    ) -> Self {
        Self {
            tenants,
            jwks,
            db,
            clock,
        }
    }

    /// Validate the OIDC callback (`state` plus `id_token`)
    ///
    /// # Errors
    ///
    /// Returns an `Lti13` error whose kind names the failed check.
    pub async fn validate_launch(
        &self,
        id_token: &str,
        state: &str,
    ) -> AppResult<ValidatedIdToken> {
        let now = self.clock.now();
        if state.is_empty()
            || !self
                .db
                .consume_nonce(nonce_scopes::OIDC_STATE, state, now)
                .await?
        {
            return Err(fail(Lti13ErrorKind::State, "Unknown or replayed OIDC state"));
        }
        self.validate(id_token).await
    }

    /// Validate an `id_token`
    ///
    /// # Errors
    ///
    /// Returns an `Lti13` error whose kind names the failed check.
    pub async fn validate(&self, id_token: &str) -> AppResult<ValidatedIdToken> {
        let header = decode_header(id_token)
            .map_err(|e| fail(Lti13ErrorKind::Header, format!("id_token header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(fail(
                Lti13ErrorKind::Header,
                format!("id_token alg {:?} is not RS256", header.alg),
            ));
        }
        if header.kid.is_none() {
            return Err(fail(Lti13ErrorKind::Header, "id_token header has no kid"));
        }

        let registration = self.registration_for(&unverified_claims(id_token)?).await?;
        let keyset = self.jwks.get(&registration.key_set_url).await?;
        let claims_json =
            jws_verify(id_token, &keyset, &[Algorithm::RS256]).map_err(classify_jws_error)?;

        self.check_claims(&registration, &claims_json)?;

        let nonce = claims_json
            .get("nonce")
            .and_then(Value::as_str)
            .filter(|nonce| !nonce.is_empty())
            .ok_or_else(|| fail(Lti13ErrorKind::Nonce, "id_token has no nonce"))?;
        let scope = format!("{}{}", nonce_scopes::LTI13_PREFIX, registration.id);
        if !self
            .db
            .consume_nonce(&scope, nonce, self.clock.now())
            .await?
        {
            warn!(registration_id = registration.id, "LTI 1.3 nonce unknown or replayed");
            return Err(fail(Lti13ErrorKind::Nonce, "Unknown or replayed nonce"));
        }

        let deployment_id = claims_json
            .get(claims::DEPLOYMENT_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| fail(Lti13ErrorKind::Deployment, "id_token has no deployment_id"))?;
        let instance = self
            .db
            .get_application_instance_by_deployment(registration.id, deployment_id)
            .await?
            .ok_or_else(|| {
                fail(
                    Lti13ErrorKind::Deployment,
                    format!(
                        "Deployment {deployment_id} unknown for registration {}",
                        registration.id
                    ),
                )
            })?;

        Ok(ValidatedIdToken {
            registration,
            instance,
            claims: claims_json,
        })
    }

    async fn registration_for(&self, claims_json: &Value) -> AppResult<LtiRegistration> {
        let issuer = claims_json
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| fail(Lti13ErrorKind::Issuer, "id_token has no iss"))?;
        let candidates = match claims_json.get("azp").and_then(Value::as_str) {
            Some(azp) => vec![azp],
            None => audiences(claims_json),
        };
        for client_id in candidates {
            if let Some(registration) = self.tenants.registration(issuer, Some(client_id)).await? {
                return Ok(registration);
            }
        }
        Err(fail(
            Lti13ErrorKind::UnknownRegistration,
            format!("No registration for issuer {issuer}"),
        ))
    }

    fn check_claims(&self, registration: &LtiRegistration, claims_json: &Value) -> AppResult<()> {
        if claims_json.get("iss").and_then(Value::as_str) != Some(registration.issuer.as_str()) {
            return Err(fail(Lti13ErrorKind::Issuer, "iss does not match the registration"));
        }
        if !audiences(claims_json).contains(&registration.client_id.as_str()) {
            return Err(fail(
                Lti13ErrorKind::Audience,
                "aud does not contain the registration client_id",
            ));
        }
        if let Some(azp) = claims_json.get("azp") {
            if azp.as_str() != Some(registration.client_id.as_str()) {
                return Err(fail(
                    Lti13ErrorKind::AuthorizedParty,
                    "azp does not match the registration client_id",
                ));
            }
        }
        check_time_claims(claims_json, self.clock.now(), ID_TOKEN_LEEWAY_SECS, true).map_err(
            |error| match error {
                JwsError::Malformed(message) => fail(Lti13ErrorKind::Claims, message),
                other => classify_jws_error(other),
            },
        )
    }
}
