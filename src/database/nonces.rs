// ABOUTME: Database-backed nonce store shared by every worker process
// ABOUTME: Atomic record-if-unused and consume-once for OAuth1, id_token and OIDC state nonces
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};

use super::{timestamp, Database};
use crate::errors::{AppError, AppResult};

impl Database {
    /// Record `(scope, nonce)` unless an unexpired entry exists
    ///
    /// An expired entry for the same pair is overwritten in the same statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn record_nonce_impl(
        &self,
        scope: &str,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO nonces (scope, nonce, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (scope, nonce) DO UPDATE SET expires_at = excluded.expires_at
            WHERE nonces.expires_at <= ?4
            ",
        )
        .bind(scope)
        .bind(nonce)
        .bind(timestamp(expires_at))
        .bind(timestamp(now))
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to record nonce: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove an unexpired nonce, reporting whether it was there
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn consume_nonce_impl(
        &self,
        scope: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM nonces WHERE scope = ?1 AND nonce = ?2 AND expires_at > ?3",
        )
        .bind(scope)
        .bind(nonce)
        .bind(timestamp(now))
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to consume nonce: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop every expired nonce
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn purge_expired_nonces_impl(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM nonces WHERE expires_at <= ?1")
            .bind(timestamp(now))
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to purge nonces: {e}")))?;

        Ok(result.rows_affected())
    }
}
