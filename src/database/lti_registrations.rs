// ABOUTME: Database operations for LTI 1.3 platform registrations
// ABOUTME: Lookup by (issuer, client_id) as carried in OIDC login requests and id tokens
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use super::{column, timestamp, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{LtiRegistration, NewLtiRegistration};

impl Database {
    fn row_to_registration(row: &SqliteRow) -> AppResult<LtiRegistration> {
        Ok(LtiRegistration {
            id: column(row, "id")?,
            issuer: column(row, "issuer")?,
            client_id: column(row, "client_id")?,
            auth_login_url: column(row, "auth_login_url")?,
            key_set_url: column(row, "key_set_url")?,
            token_url: column(row, "token_url")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    /// Insert a registration
    ///
    /// # Errors
    ///
    /// Returns an error if `(issuer, client_id)` already exists.
    pub async fn create_lti_registration_impl(
        &self,
        registration: &NewLtiRegistration,
        now: DateTime<Utc>,
    ) -> AppResult<LtiRegistration> {
        let row = sqlx::query(
            r"
            INSERT INTO lti_registrations
                (issuer, client_id, auth_login_url, key_set_url, token_url, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING *
            ",
        )
        .bind(&registration.issuer)
        .bind(&registration.client_id)
        .bind(&registration.auth_login_url)
        .bind(&registration.key_set_url)
        .bind(&registration.token_url)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to create LTI registration: {e}")))?;

        Self::row_to_registration(&row)
    }

    /// Look up a registration by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_lti_registration_impl(&self, id: i64) -> AppResult<Option<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTI registration: {e}")))?
            .as_ref()
            .map(Self::row_to_registration)
            .transpose()
    }

    /// Look up a registration by `(issuer, client_id)`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_lti_registration_by_client_id_impl(
        &self,
        issuer: &str,
        client_id: &str,
    ) -> AppResult<Option<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE issuer = ?1 AND client_id = ?2")
            .bind(issuer)
            .bind(client_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTI registration: {e}")))?
            .as_ref()
            .map(Self::row_to_registration)
            .transpose()
    }

    /// All registrations for an issuer, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_lti_registrations_by_issuer_impl(
        &self,
        issuer: &str,
    ) -> AppResult<Vec<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE issuer = ?1 ORDER BY id")
            .bind(issuer)
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to list LTI registrations: {e}")))?
            .iter()
            .map(Self::row_to_registration)
            .collect()
    }
}
