// ABOUTME: JWS signing and verification (RS256, HS256) on top of jsonwebtoken
// ABOUTME: Signature-only verification with an algorithm whitelist; time claims checked against the injected clock
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! JWS primitives
//!
//! `jsonwebtoken` reads the system clock for `exp`/`nbf`, so verification here
//! disables its time checks and [`check_time_claims`] applies them against a
//! caller-supplied `now` instead.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::AppError;

/// Key material for [`jws_sign`]
pub enum SigningKey<'a> {
    /// Shared secret for HS256
    Hmac(&'a [u8]),
    /// PKCS#8 / PKCS#1 PEM private key for RS256
    RsaPem(&'a str),
}

/// JWS failures, fine-grained so callers can classify them
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwsError {
    /// Token or header cannot be parsed
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Header algorithm is not whitelisted
    #[error("algorithm {0:?} not allowed")]
    AlgorithmNotAllowed(Algorithm),
    /// Header has no `kid`
    #[error("token header has no kid")]
    MissingKid,
    /// No key in the set matches the `kid`
    #[error("no key with kid {0}")]
    UnknownKey(String),
    /// Key material unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Signature does not verify
    #[error("invalid signature")]
    InvalidSignature,
    /// `exp` has passed
    #[error("token expired")]
    Expired,
    /// `iat` or `nbf` is in the future
    #[error("token not yet valid")]
    NotYetValid,
}

impl From<JwsError> for AppError {
    fn from(error: JwsError) -> Self {
        match error {
            JwsError::Malformed(_) | JwsError::InvalidKey(_) => Self::crypto(error.to_string()),
            _ => Self::signature(error.to_string()),
        }
    }
}

/// Sign `claims`, optionally setting `kid` in the header
///
/// # Errors
///
/// Returns [`JwsError::InvalidKey`] if the key cannot be loaded or signing fails.
pub fn jws_sign<T: Serialize>(
    claims: &T,
    key: &SigningKey<'_>,
    kid: Option<&str>,
) -> Result<String, JwsError> {
    let (algorithm, encoding_key) = match key {
        SigningKey::Hmac(secret) => (Algorithm::HS256, EncodingKey::from_secret(secret)),
        SigningKey::RsaPem(pem) => (
            Algorithm::RS256,
            EncodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| JwsError::InvalidKey(e.to_string()))?,
        ),
    };

    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_owned);

    encode(&header, claims, &encoding_key).map_err(|e| JwsError::InvalidKey(e.to_string()))
}

fn signature_only_validation(algorithms: &[Algorithm]) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = algorithms.to_vec();
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation
}

fn map_decode_error(error: &JwtError) -> JwsError {
    match error.kind() {
        ErrorKind::InvalidSignature => JwsError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => JwsError::InvalidKey("key does not match algorithm".into()),
        _ => JwsError::Malformed(error.to_string()),
    }
}

/// Verify a token against a JWKS and return its claims
///
/// The header `alg` must be in `alg_whitelist` and a `kid` must name a key of
/// `keyset`. Only the signature is checked; see [`check_time_claims`].
///
/// # Errors
///
/// Returns the matching [`JwsError`] for every failure.
pub fn jws_verify(
    token: &str,
    keyset: &JwkSet,
    alg_whitelist: &[Algorithm],
) -> Result<Value, JwsError> {
    let header = decode_header(token).map_err(|e| JwsError::Malformed(e.to_string()))?;
    if alg_whitelist.is_empty() || !alg_whitelist.contains(&header.alg) {
        return Err(JwsError::AlgorithmNotAllowed(header.alg));
    }
    let kid = header.kid.ok_or(JwsError::MissingKid)?;
    let jwk = keyset
        .find(&kid)
        .ok_or_else(|| JwsError::UnknownKey(kid.clone()))?;
    let decoding_key =
        DecodingKey::from_jwk(jwk).map_err(|e| JwsError::InvalidKey(e.to_string()))?;

    decode::<Value>(token, &decoding_key, &signature_only_validation(&[header.alg]))
        .map(|data| data.claims)
        .map_err(|e| map_decode_error(&e))
}

/// Verify an HS256 token with a shared secret and return its claims
///
/// # Errors
///
/// Returns the matching [`JwsError`] for every failure.
pub fn hs256_verify(token: &str, secret: &[u8]) -> Result<Value, JwsError> {
    decode::<Value>(
        token,
        &DecodingKey::from_secret(secret),
        &signature_only_validation(&[Algorithm::HS256]),
    )
    .map(|data| data.claims)
    .map_err(|e| map_decode_error(&e))
}

/// Check `exp`, `iat` and `nbf` of `claims` against `now`
///
/// `exp` is required when `require_exp` is set. Each check tolerates
/// `leeway_secs` of skew.
///
/// # Errors
///
/// Returns [`JwsError::Expired`], [`JwsError::NotYetValid`] or
/// [`JwsError::Malformed`] for a missing or non-numeric claim.
pub fn check_time_claims(
    claims: &Value,
    now: DateTime<Utc>,
    leeway_secs: i64,
    require_exp: bool,
) -> Result<(), JwsError> {
    let now = now.timestamp();
    let numeric = |name: &str| -> Result<Option<i64>, JwsError> {
        match claims.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| JwsError::Malformed(format!("{name} is not numeric"))),
        }
    };

    match numeric("exp")? {
        Some(exp) if exp + leeway_secs <= now => return Err(JwsError::Expired),
        None if require_exp => return Err(JwsError::Malformed("exp is required".into())),
        _ => {}
    }
    if numeric("iat")?.is_some_and(|iat| iat > now + leeway_secs) {
        return Err(JwsError::NotYetValid);
    }
    if numeric("nbf")?.is_some_and(|nbf| nbf > now + leeway_secs) {
        return Err(JwsError::NotYetValid);
    }
    Ok(())
}
