// ABOUTME: Rotating RSA signing key model
// ABOUTME: Public half as JWK, private half as AES-CFB encrypted PEM
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One RSA keypair of the tool's signing keyset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaKey {
    /// Key id (UUID hex, globally unique)
    pub kid: String,
    /// Public key as a JWK object
    pub jwk: Value,
    /// Base64 AES-CFB ciphertext of the PKCS#8 PEM private key
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Base64 IV used for `private_key`
    #[serde(skip_serializing)]
    pub aes_cipher_iv: String,
    /// Expired keys are no longer published nor used for signing
    pub expired: bool,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub updated: DateTime<Utc>,
}
