// ABOUTME: AES-128-CFB8 encryption for secrets at rest
// ABOUTME: Compatible with ciphertexts already stored by the LMS deployment (base64 value plus IV)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::errors::{AppError, AppResult};

type CfbEncryptor = cfb8::Encryptor<Aes128>;
type CfbDecryptor = cfb8::Decryptor<Aes128>;

/// Length of an IV in bytes
pub const IV_LEN: usize = 16;

/// Required length of the configured secret
pub const AES_SECRET_LEN: usize = 32;

/// Generate a fresh random IV
#[must_use]
pub fn build_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// AES-CFB cipher keyed from the deployment's `AES_SECRET`
///
/// The first 16 bytes of the 32-byte secret form the AES-128 key.
#[derive(Clone)]
pub struct AesCipher {
    key: Zeroizing<[u8; 16]>,
}

impl fmt::Debug for AesCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AesCipher {
    /// Build from the configured secret
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error unless `secret` is exactly 32 bytes.
    pub fn new(secret: &[u8]) -> AppResult<Self> {
        if secret.len() != AES_SECRET_LEN {
            return Err(AppError::crypto(format!(
                "AES secret must be {AES_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; 16]);
        key.copy_from_slice(&secret[..16]);
        Ok(Self { key })
    }

    /// Encrypt `plaintext` under `iv`
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if `iv` is not 16 bytes.
    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let cipher = CfbEncryptor::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| AppError::crypto(format!("Invalid AES IV: {e}")))?;
        let mut buffer = plaintext.to_vec();
        cipher.encrypt(&mut buffer);
        Ok(buffer)
    }

    /// Decrypt `ciphertext` produced under `iv`
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if `iv` is not 16 bytes.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> AppResult<Vec<u8>> {
        let cipher = CfbDecryptor::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| AppError::crypto(format!("Invalid AES IV: {e}")))?;
        let mut buffer = ciphertext.to_vec();
        cipher.decrypt(&mut buffer);
        Ok(buffer)
    }

    /// Encrypt a string with a fresh IV, returning `(base64 ciphertext, base64 iv)`
    ///
    /// # Errors
    ///
    /// Propagates encryption failures.
    pub fn encrypt_to_base64(&self, plaintext: &str) -> AppResult<(String, String)> {
        let iv = build_iv();
        let ciphertext = self.encrypt(&iv, plaintext.as_bytes())?;
        Ok((STANDARD.encode(ciphertext), STANDARD.encode(iv)))
    }

    /// Reverse [`Self::encrypt_to_base64`]
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error on bad base64, a bad IV, or non UTF-8 plaintext.
    pub fn decrypt_from_base64(&self, ciphertext_b64: &str, iv_b64: &str) -> AppResult<String> {
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| AppError::crypto(format!("Ciphertext is not valid base64: {e}")))?;
        let iv = STANDARD
            .decode(iv_b64)
            .map_err(|e| AppError::crypto(format!("IV is not valid base64: {e}")))?;
        let plaintext = self.decrypt(&iv, &ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|e| AppError::crypto(format!("Decrypted value is not UTF-8: {e}")))
    }
}
