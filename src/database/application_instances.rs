// ABOUTME: Database operations for application instances (tenants)
// ABOUTME: Credential lookups, settings persistence, GUID first-claim and settings-filtered search
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;

use super::{column, json_column, optional_timestamp_column, timestamp, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{ApplicationInstance, NewApplicationInstance};
use crate::tenants::settings::SettingsFilter;

impl Database {
    fn row_to_application_instance(row: &SqliteRow) -> AppResult<ApplicationInstance> {
        Ok(ApplicationInstance {
            id: column(row, "id")?,
            consumer_key: column(row, "consumer_key")?,
            shared_secret: column(row, "shared_secret")?,
            lti_registration_id: column(row, "lti_registration_id")?,
            deployment_id: column(row, "deployment_id")?,
            tool_consumer_instance_guid: column(row, "tool_consumer_instance_guid")?,
            lms_url: column(row, "lms_url")?,
            organization_id: column(row, "organization_id")?,
            settings: json_column(row, "settings")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
            last_launched: optional_timestamp_column(row, "last_launched")?,
        })
    }

    /// Insert an application instance
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for incomplete credentials, or a database error
    /// when the consumer key or deployment is already registered.
    pub async fn create_application_instance_impl(
        &self,
        instance: &NewApplicationInstance,
        now: DateTime<Utc>,
    ) -> AppResult<ApplicationInstance> {
        instance.validate()?;
        let settings = if instance.settings.is_object() {
            instance.settings.to_string()
        } else {
            "{}".to_owned()
        };

        let row = sqlx::query(
            r"
            INSERT INTO application_instances
                (consumer_key, shared_secret, lti_registration_id, deployment_id,
                 lms_url, organization_id, settings, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            RETURNING *
            ",
        )
        .bind(&instance.consumer_key)
        .bind(&instance.shared_secret)
        .bind(instance.lti_registration_id)
        .bind(&instance.deployment_id)
        .bind(&instance.lms_url)
        .bind(instance.organization_id)
        .bind(settings)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to create application instance: {e}")))?;

        Self::row_to_application_instance(&row)
    }

    /// Look up by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_application_instance_impl(
        &self,
        id: i64,
    ) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query("SELECT * FROM application_instances WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
            .as_ref()
            .map(Self::row_to_application_instance)
            .transpose()
    }

    /// Look up by LTI 1.1 consumer key
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_application_instance_by_consumer_key_impl(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query("SELECT * FROM application_instances WHERE consumer_key = ?1")
            .bind(consumer_key)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
            .as_ref()
            .map(Self::row_to_application_instance)
            .transpose()
    }

    /// Look up by LTI 1.3 `(registration, deployment_id)`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_application_instance_by_deployment_impl(
        &self,
        lti_registration_id: i64,
        deployment_id: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query(
            r"
            SELECT * FROM application_instances
            WHERE lti_registration_id = ?1 AND deployment_id = ?2
            ",
        )
        .bind(lti_registration_id)
        .bind(deployment_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
        .as_ref()
        .map(Self::row_to_application_instance)
        .transpose()
    }

    /// Overwrite the settings document
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no instance has `id`.
    pub async fn update_application_instance_settings_impl(
        &self,
        id: i64,
        settings: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE application_instances SET settings = ?1, updated = ?2 WHERE id = ?3")
                .bind(settings.to_string())
                .bind(timestamp(now))
                .bind(id)
                .execute(self.pool())
                .await
                .map_err(|e| {
                    AppError::database(format!("Failed to update application settings: {e}"))
                })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Application instance {id}")));
        }
        Ok(())
    }

    /// Record the GUID unless one is already set
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn claim_tool_consumer_instance_guid_impl(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE application_instances
            SET tool_consumer_instance_guid = ?1, updated = ?2
            WHERE id = ?3 AND tool_consumer_instance_guid IS NULL
            ",
        )
        .bind(guid)
        .bind(timestamp(now))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to record instance GUID: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    /// Stamp a successful launch
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn record_application_instance_launch_impl(
        &self,
        id: i64,
        lms_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE application_instances
            SET last_launched = ?1,
                updated = ?1,
                lms_url = COALESCE(NULLIF(lms_url, ''), ?2)
            WHERE id = ?3
            ",
        )
        .bind(timestamp(now))
        .bind(lms_url)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to record launch: {e}")))?;

        Ok(())
    }

    /// Instances whose settings satisfy `filter`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_application_instances_by_settings_impl(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>> {
        let compiled = filter.to_sqlite("settings");
        let sql = format!(
            "SELECT * FROM application_instances WHERE {} ORDER BY id",
            compiled.sql
        );
        let mut query = sqlx::query(&sql);
        for bind in &compiled.binds {
            query = query.bind(bind);
        }

        query
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to search application settings: {e}")))?
            .iter()
            .map(Self::row_to_application_instance)
            .collect()
    }
}
