// ABOUTME: Rotating RSA signing keyset for outbound LTI 1.3 service calls
// ABOUTME: Key generation with encrypted private keys, JWKS publication, signer selection and rotation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Keyset Manager
//!
//! Keys live in `rsa_keys`. A key is *young* while `created` is within the
//! rotation `max_age`; rotation tops up young keys first, then expires the
//! old ones, so the set is never left without a usable signer.

use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::SharedClock;
use crate::crypto::{AesCipher, JsonWebKey, JsonWebKeySet, RsaKeyMaterial};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::models::RsaKey;

/// Signing key chosen for one outbound request
pub struct Signer {
    /// Key id to put in the JWS header
    pub kid: String,
    /// PKCS#8 PEM private key
    pub private_key_pem: Zeroizing<String>,
}

/// Outcome of one [`KeysetManager::rotate`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Keys generated
    pub created: usize,
    /// Keys marked expired
    pub expired: u64,
    /// Expired keys deleted
    pub deleted: u64,
}

/// Keyset manager
#[derive(Clone)]
pub struct KeysetManager {
    db: Arc<Database>,
    cipher: AesCipher,
    clock: SharedClock,
    key_bits: usize,
}

impl KeysetManager {
    /// Create a manager generating keys of `key_bits`
    #[must_use]
    pub const fn new(
        db: Arc<Database>,
        cipher: AesCipher,
        clock: SharedClock,
        key_bits: usize,
    ) -> Self {
        Self {
            db,
            cipher,
            clock,
            key_bits,
        }
    }

    /// Generate, encrypt and store a new key
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if generation or encryption fails, or a
    /// database error if the insert fails.
    pub async fn generate(&self) -> AppResult<RsaKey> {
        let bits = self.key_bits;
        let material = task::spawn_blocking(move || RsaKeyMaterial::generate(bits))
            .await
            .map_err(|e| AppError::internal(format!("Key generation task failed: {e}")))??;

        let kid = Uuid::new_v4().simple().to_string();
        let pem = material.private_key_pem()?;
        let (private_key, aes_cipher_iv) = self.cipher.encrypt_to_base64(&pem)?;
        let jwk = serde_json::to_value(material.to_jwk(&kid))
            .map_err(|e| AppError::internal(format!("Failed to encode JWK: {e}")))?;

        let now = self.clock.now();
        let key = RsaKey {
            kid,
            jwk,
            private_key,
            aes_cipher_iv,
            expired: false,
            created: now,
            updated: now,
        };
        self.db.insert_rsa_key(&key).await?;
        debug!(kid = %key.kid, "Generated RSA signing key");
        Ok(key)
    }

    async fn active_keys(&self) -> AppResult<Vec<RsaKey>> {
        Ok(self
            .db
            .list_rsa_keys()
            .await?
            .into_iter()
            .filter(|key| !key.expired)
            .collect())
    }

    /// Pick a signer uniformly among non-expired keys
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the keyset is empty and a `Crypto` error when
    /// the private key cannot be decrypted.
    pub async fn current_signer(&self) -> AppResult<Signer> {
        let keys = self.active_keys().await?;
        let key = keys
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| AppError::internal("No RSA signing key available; run key rotation"))?;

        let pem = self
            .cipher
            .decrypt_from_base64(&key.private_key, &key.aes_cipher_iv)?;
        Ok(Signer {
            kid: key.kid.clone(),
            private_key_pem: Zeroizing::new(pem),
        })
    }

    /// Public keys of every non-expired key
    ///
    /// # Errors
    ///
    /// Returns an error if a stored JWK does not parse.
    pub async fn jwks(&self) -> AppResult<JsonWebKeySet> {
        let keys = self
            .active_keys()
            .await?
            .into_iter()
            .map(|key| {
                serde_json::from_value::<JsonWebKey>(key.jwk).map_err(|e| {
                    AppError::internal(format!("Stored JWK for {} is invalid: {e}", key.kid))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(JsonWebKeySet { keys })
    }

    /// Bring the keyset to `target` young keys and age out old ones
    ///
    /// # Errors
    ///
    /// Propagates generation and database errors. Keys created before a
    /// failure stay in place; the next pass continues from there.
    pub async fn rotate(
        &self,
        target: usize,
        max_age: Duration,
        max_expired_age: Duration,
    ) -> AppResult<RotationReport> {
        let now = self.clock.now();
        let keys = self.db.list_rsa_keys().await?;
        let mut report = RotationReport::default();

        let young = keys
            .iter()
            .filter(|key| !key.expired && now - key.created < max_age)
            .count();
        for _ in young..target {
            self.generate().await?;
            report.created += 1;
        }

        let mut old: Vec<String> = keys
            .iter()
            .filter(|key| !key.expired && now - key.created >= max_age)
            .map(|key| key.kid.clone())
            .collect();
        if young + report.created == 0 {
            // keys are listed oldest first; the newest old key stays the signer
            old.pop();
        }
        report.expired = self.db.expire_rsa_keys(&old, now).await?;

        let stale: Vec<String> = keys
            .iter()
            .filter(|key| now - key.created > max_expired_age)
            .filter(|key| key.expired || old.contains(&key.kid))
            .map(|key| key.kid.clone())
            .collect();
        report.deleted = self.db.delete_rsa_keys(&stale).await?;

        info!(
            created = report.created,
            expired = report.expired,
            deleted = report.deleted,
            "RSA keyset rotated"
        );
        Ok(report)
    }
}
