// ABOUTME: Cryptographic primitives used by the launch core
// ABOUTME: AES-CFB secrets at rest, RSA keypairs and JWS sign/verify
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// AES-CFB encryption of secrets stored in the database
pub mod aes;
/// JWS sign/verify
pub mod jws;
/// RSA keypairs and JWK encoding
pub mod keys;

pub use aes::{build_iv, AesCipher};
pub use jws::{check_time_claims, hs256_verify, jws_sign, jws_verify, JwsError, SigningKey};
pub use keys::{JsonWebKey, JsonWebKeySet, RsaKeyMaterial};
