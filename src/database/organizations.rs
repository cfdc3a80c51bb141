// ABOUTME: Database operations for organizations
// ABOUTME: Create, lookup, re-parenting and enable/disable of the tenant hierarchy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use super::{column, json_column, timestamp, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{NewOrganization, Organization};

impl Database {
    fn row_to_organization(row: &SqliteRow) -> AppResult<Organization> {
        Ok(Organization {
            id: column(row, "id")?,
            public_id: column(row, "public_id")?,
            name: column(row, "name")?,
            parent_id: column(row, "parent_id")?,
            enabled: column(row, "enabled")?,
            settings: json_column(row, "settings")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    /// Insert an organization
    ///
    /// # Errors
    ///
    /// Returns an error if the public id is taken or the insert fails.
    pub async fn create_organization_impl(
        &self,
        organization: &NewOrganization,
        now: DateTime<Utc>,
    ) -> AppResult<Organization> {
        let row = sqlx::query(
            r"
            INSERT INTO organizations (public_id, name, parent_id, enabled, settings, created, updated)
            VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)
            RETURNING *
            ",
        )
        .bind(&organization.public_id)
        .bind(&organization.name)
        .bind(organization.parent_id)
        .bind(organization.enabled)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to create organization: {e}")))?;

        Self::row_to_organization(&row)
    }

    /// Look up an organization by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_organization_impl(&self, id: i64) -> AppResult<Option<Organization>> {
        sqlx::query("SELECT * FROM organizations WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get organization: {e}")))?
            .as_ref()
            .map(Self::row_to_organization)
            .transpose()
    }

    /// Look up an organization by public id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_organization_by_public_id_impl(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>> {
        sqlx::query("SELECT * FROM organizations WHERE public_id = ?1")
            .bind(public_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get organization: {e}")))?
            .as_ref()
            .map(Self::row_to_organization)
            .transpose()
    }

    /// Replace the parent pointer
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no organization has `id`.
    pub async fn update_organization_parent_impl(
        &self,
        id: i64,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE organizations SET parent_id = ?1, updated = ?2 WHERE id = ?3
            ",
        )
        .bind(parent_id)
        .bind(timestamp(now))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to update organization parent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Organization {id}")));
        }
        Ok(())
    }

    /// Flip the enabled flag
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no organization has `id`.
    pub async fn update_organization_enabled_impl(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query("UPDATE organizations SET enabled = ?1, updated = ?2 WHERE id = ?3")
            .bind(enabled)
            .bind(timestamp(now))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to update organization: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Organization {id}")));
        }
        Ok(())
    }
}
