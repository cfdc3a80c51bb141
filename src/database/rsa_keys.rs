// ABOUTME: Database operations for the tool's RSA signing keyset
// ABOUTME: Insert, list oldest-first, bulk expire and bulk delete by kid
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite};

use super::{column, json_column, timestamp, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::RsaKey;

impl Database {
    fn row_to_rsa_key(row: &SqliteRow) -> AppResult<RsaKey> {
        Ok(RsaKey {
            kid: column(row, "kid")?,
            jwk: json_column(row, "jwk")?,
            private_key: column(row, "private_key")?,
            aes_cipher_iv: column(row, "aes_cipher_iv")?,
            expired: column(row, "expired")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    /// Store a key
    ///
    /// # Errors
    ///
    /// Returns an error if the kid already exists.
    pub async fn insert_rsa_key_impl(&self, key: &RsaKey) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO rsa_keys (kid, jwk, private_key, aes_cipher_iv, expired, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&key.kid)
        .bind(key.jwk.to_string())
        .bind(&key.private_key)
        .bind(&key.aes_cipher_iv)
        .bind(key.expired)
        .bind(timestamp(key.created))
        .bind(timestamp(key.updated))
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to insert RSA key: {e}")))?;

        Ok(())
    }

    /// Every key, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_rsa_keys_impl(&self) -> AppResult<Vec<RsaKey>> {
        sqlx::query("SELECT * FROM rsa_keys ORDER BY created, id")
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to list RSA keys: {e}")))?
            .iter()
            .map(Self::row_to_rsa_key)
            .collect()
    }

    /// Flag keys as expired
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn expire_rsa_keys_impl(
        &self,
        kids: &[String],
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        if kids.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE rsa_keys SET expired = 1, updated = ");
        builder.push_bind(timestamp(now));
        builder.push(" WHERE kid IN (");
        let mut separated = builder.separated(", ");
        for kid in kids {
            separated.push_bind(kid);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to expire RSA keys: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Delete keys
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_rsa_keys_impl(&self, kids: &[String]) -> AppResult<u64> {
        if kids.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM rsa_keys WHERE kid IN (");
        let mut separated = builder.separated(", ");
        for kid in kids {
            separated.push_bind(kid);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to delete RSA keys: {e}")))?;

        Ok(result.rows_affected())
    }
}
