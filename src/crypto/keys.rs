// ABOUTME: RSA keypair generation and JWK encoding for the tool's signing keyset
// ABOUTME: PKCS#8 PEM export/import and the published JsonWebKey document shape
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{AppError, AppResult};

/// Public key as published in the tool's JWKS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA")
    pub kty: String,
    /// Public key use (always "sig")
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key id
    pub kid: String,
    /// Algorithm (always "RS256")
    pub alg: String,
    /// Modulus, base64url
    pub n: String,
    /// Exponent, base64url
    pub e: String,
}

/// JWKS document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Published keys
    pub keys: Vec<JsonWebKey>,
}

/// Freshly generated or decrypted RSA private key
pub struct RsaKeyMaterial {
    private_key: RsaPrivateKey,
}

impl RsaKeyMaterial {
    /// Generate a keypair with the given modulus size
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if key generation fails.
    pub fn generate(bits: usize) -> AppResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| AppError::crypto(format!("Failed to generate RSA private key: {e}")))?;
        Ok(Self { private_key })
    }

    /// Load from a PKCS#8 PEM
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the PEM does not parse.
    pub fn from_pkcs8_pem(pem: &str) -> AppResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AppError::crypto(format!("Failed to parse private key PEM: {e}")))?;
        Ok(Self { private_key })
    }

    /// PKCS#8 PEM of the private key
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if encoding fails.
    pub fn private_key_pem(&self) -> AppResult<Zeroizing<String>> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::crypto(format!("Failed to export private key as PEM: {e}")))
    }

    /// Public half as a JWK
    #[must_use]
    pub fn to_jwk(&self, kid: &str) -> JsonWebKey {
        let public_key = RsaPublicKey::from(&self.private_key);
        JsonWebKey {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            kid: kid.to_owned(),
            alg: "RS256".to_owned(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }
}
