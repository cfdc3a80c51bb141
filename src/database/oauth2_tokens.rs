// ABOUTME: Database operations for per-user LMS OAuth2 tokens and registration-level LTIA tokens
// ABOUTME: Upserts keyed by (tenant, user, service) and (registration, scopes)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use super::{column, timestamp, timestamp_column, Database};
use crate::database_plugins::SavedOAuth2Token;
use crate::errors::{AppError, AppResult};
use crate::models::{JwtOAuth2Token, OAuth2Service, OAuth2Token, OAuth2TokenUpdate};

impl Database {
    fn row_to_oauth2_token(row: &SqliteRow) -> AppResult<OAuth2Token> {
        let service: String = column(row, "service")?;
        Ok(OAuth2Token {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            user_id: column(row, "user_id")?,
            service: service.parse()?,
            access_token: column(row, "access_token")?,
            refresh_token: column(row, "refresh_token")?,
            expires_in: column(row, "expires_in")?,
            received_at: timestamp_column(row, "received_at")?,
        })
    }

    fn row_to_jwt_oauth2_token(row: &SqliteRow) -> AppResult<JwtOAuth2Token> {
        Ok(JwtOAuth2Token {
            id: column(row, "id")?,
            lti_registration_id: column(row, "lti_registration_id")?,
            scopes: column(row, "scopes")?,
            access_token: column(row, "access_token")?,
            expires_at: timestamp_column(row, "expires_at")?,
            received_at: timestamp_column(row, "received_at")?,
        })
    }

    /// Look up the token for `(tenant, user, service)`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_oauth2_token_impl(
        &self,
        application_instance_id: i64,
        user_id: i64,
        service: OAuth2Service,
    ) -> AppResult<Option<OAuth2Token>> {
        sqlx::query(
            r"
            SELECT * FROM oauth2_tokens
            WHERE application_instance_id = ?1 AND user_id = ?2 AND service = ?3
            ",
        )
        .bind(application_instance_id)
        .bind(user_id)
        .bind(service.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to get OAuth2 token: {e}")))?
        .as_ref()
        .map(Self::row_to_oauth2_token)
        .transpose()
    }

    /// Upsert a token, keeping the stored refresh token when none is given
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn save_oauth2_token_impl(
        &self,
        update: &OAuth2TokenUpdate,
    ) -> AppResult<SavedOAuth2Token> {
        let previous_refresh_token = self
            .get_oauth2_token_impl(update.application_instance_id, update.user_id, update.service)
            .await?
            .and_then(|token| token.refresh_token);

        let row = sqlx::query(
            r"
            INSERT INTO oauth2_tokens
                (application_instance_id, user_id, service, access_token, refresh_token, expires_in, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (application_instance_id, user_id, service) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, oauth2_tokens.refresh_token),
                expires_in = excluded.expires_in,
                received_at = excluded.received_at
            RETURNING *
            ",
        )
        .bind(update.application_instance_id)
        .bind(update.user_id)
        .bind(update.service.as_str())
        .bind(&update.access_token)
        .bind(&update.refresh_token)
        .bind(update.expires_in)
        .bind(timestamp(update.received_at))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to save OAuth2 token: {e}")))?;

        Ok(SavedOAuth2Token {
            token: Self::row_to_oauth2_token(&row)?,
            previous_refresh_token,
        })
    }

    /// Look up the LTIA token for `(registration, scopes)`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_jwt_oauth2_token_impl(
        &self,
        lti_registration_id: i64,
        scopes: &str,
    ) -> AppResult<Option<JwtOAuth2Token>> {
        sqlx::query("SELECT * FROM jwt_oauth2_tokens WHERE lti_registration_id = ?1 AND scopes = ?2")
            .bind(lti_registration_id)
            .bind(scopes)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTIA token: {e}")))?
            .as_ref()
            .map(Self::row_to_jwt_oauth2_token)
            .transpose()
    }

    /// Upsert the LTIA token for `(registration, scopes)`
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn save_jwt_oauth2_token_impl(
        &self,
        lti_registration_id: i64,
        scopes: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<JwtOAuth2Token> {
        let row = sqlx::query(
            r"
            INSERT INTO jwt_oauth2_tokens (lti_registration_id, scopes, access_token, expires_at, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (lti_registration_id, scopes) DO UPDATE SET
                access_token = excluded.access_token,
                expires_at = excluded.expires_at,
                received_at = excluded.received_at
            RETURNING *
            ",
        )
        .bind(lti_registration_id)
        .bind(scopes)
        .bind(access_token)
        .bind(timestamp(expires_at))
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to save LTIA token: {e}")))?;

        Self::row_to_jwt_oauth2_token(&row)
    }
}
