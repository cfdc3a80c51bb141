// ABOUTME: SQLite database backend for the LTI launch core
// ABOUTME: Connection setup, embedded migrations, column helpers and the DatabaseProvider impl
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Application instance (tenant) storage
pub mod application_instances;
/// In-process advisory locks
pub mod locks;
/// LTI 1.3 registration storage
pub mod lti_registrations;
/// Nonce store
pub mod nonces;
/// OAuth2 and LTIA token storage
pub mod oauth2_tokens;
/// Organization storage
pub mod organizations;
/// Signing keyset storage
pub mod rsa_keys;
/// Users, courses and memberships
pub mod users;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Decode, Row, Sqlite, SqlitePool, Type};
use tracing::{debug, info};

pub use locks::{LocalLockGuard, LockRegistry};

use crate::database_plugins::{AdvisoryLock, DatabaseProvider, SavedOAuth2Token};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApplicationInstance, Course, CourseUpsert, JwtOAuth2Token, LmsUser, LockType, LtiRegistration,
    NewApplicationInstance, NewLtiRegistration, NewOrganization, OAuth2Service, OAuth2Token,
    OAuth2TokenUpdate, Organization, RsaKey, User, UserUpsert,
};
use crate::tenants::settings::SettingsFilter;

/// Fixed-width UTC timestamp; lexical order equals chronological order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid timestamp {value}: {e}")))
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> AppResult<T>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::database(format!("Failed to read column {name}: {e}")))
}

pub(crate) fn timestamp_column(row: &SqliteRow, name: &str) -> AppResult<DateTime<Utc>> {
    let value: String = column(row, name)?;
    parse_timestamp(&value)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> AppResult<Option<DateTime<Utc>>> {
    let value: Option<String> = column(row, name)?;
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn json_column(row: &SqliteRow, name: &str) -> AppResult<Value> {
    let value: String = column(row, name)?;
    serde_json::from_str(&value)
        .map_err(|e| AppError::database(format!("Column {name} is not valid JSON: {e}")))
}

/// SQLite connection pool plus the local lock registry
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    locks: LockRegistry,
}

impl Database {
    /// Connect to `database_url` and run migrations (internal implementation)
    ///
    /// An in-memory database lives exactly as long as its single pooled
    /// connection, so that connection is never recycled.
    async fn new_impl(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let db = Self {
            pool,
            locks: LockRegistry::default(),
        };
        db.migrate_impl().await?;
        debug!(in_memory, "SQLite database ready");
        Ok(db)
    }

    /// Connect to `database_url` and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails or a
    /// migration fails.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        Self::new_impl(database_url).await
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate_impl(&self) -> AppResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        info!("Database migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl DatabaseProvider for Database {
    async fn new(database_url: &str) -> AppResult<Self> {
        Self::new_impl(database_url).await
    }

    async fn migrate(&self) -> AppResult<()> {
        Self::migrate_impl(self).await
    }

    async fn create_organization(
        &self,
        organization: &NewOrganization,
        now: DateTime<Utc>,
    ) -> AppResult<Organization> {
        Self::create_organization_impl(self, organization, now).await
    }

    async fn get_organization(&self, id: i64) -> AppResult<Option<Organization>> {
        Self::get_organization_impl(self, id).await
    }

    async fn get_organization_by_public_id(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>> {
        Self::get_organization_by_public_id_impl(self, public_id).await
    }

    async fn update_organization_parent(
        &self,
        id: i64,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::update_organization_parent_impl(self, id, parent_id, now).await
    }

    async fn update_organization_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::update_organization_enabled_impl(self, id, enabled, now).await
    }

    async fn create_lti_registration(
        &self,
        registration: &NewLtiRegistration,
        now: DateTime<Utc>,
    ) -> AppResult<LtiRegistration> {
        Self::create_lti_registration_impl(self, registration, now).await
    }

    async fn get_lti_registration(&self, id: i64) -> AppResult<Option<LtiRegistration>> {
        Self::get_lti_registration_impl(self, id).await
    }

    async fn get_lti_registration_by_client_id(
        &self,
        issuer: &str,
        client_id: &str,
    ) -> AppResult<Option<LtiRegistration>> {
        Self::get_lti_registration_by_client_id_impl(self, issuer, client_id).await
    }

    async fn list_lti_registrations_by_issuer(
        &self,
        issuer: &str,
    ) -> AppResult<Vec<LtiRegistration>> {
        Self::list_lti_registrations_by_issuer_impl(self, issuer).await
    }

    async fn create_application_instance(
        &self,
        instance: &NewApplicationInstance,
        now: DateTime<Utc>,
    ) -> AppResult<ApplicationInstance> {
        Self::create_application_instance_impl(self, instance, now).await
    }

    async fn get_application_instance(&self, id: i64) -> AppResult<Option<ApplicationInstance>> {
        Self::get_application_instance_impl(self, id).await
    }

    async fn get_application_instance_by_consumer_key(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        Self::get_application_instance_by_consumer_key_impl(self, consumer_key).await
    }

    async fn get_application_instance_by_deployment(
        &self,
        lti_registration_id: i64,
        deployment_id: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        Self::get_application_instance_by_deployment_impl(self, lti_registration_id, deployment_id)
            .await
    }

    async fn update_application_instance_settings(
        &self,
        id: i64,
        settings: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::update_application_instance_settings_impl(self, id, settings, now).await
    }

    async fn claim_tool_consumer_instance_guid(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Self::claim_tool_consumer_instance_guid_impl(self, id, guid, now).await
    }

    async fn record_application_instance_launch(
        &self,
        id: i64,
        lms_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::record_application_instance_launch_impl(self, id, lms_url, now).await
    }

    async fn find_application_instances_by_settings(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>> {
        Self::find_application_instances_by_settings_impl(self, filter).await
    }

    async fn upsert_lms_user(
        &self,
        h_userid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<LmsUser> {
        Self::upsert_lms_user_impl(self, h_userid, email, display_name, now).await
    }

    async fn upsert_user(&self, user: &UserUpsert, now: DateTime<Utc>) -> AppResult<User> {
        Self::upsert_user_impl(self, user, now).await
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        Self::get_user_impl(self, id).await
    }

    async fn get_user_by_lti_user_id(
        &self,
        application_instance_id: i64,
        lti_user_id: &str,
    ) -> AppResult<Option<User>> {
        Self::get_user_by_lti_user_id_impl(self, application_instance_id, lti_user_id).await
    }

    async fn upsert_course(&self, course: &CourseUpsert, now: DateTime<Utc>) -> AppResult<Course> {
        Self::upsert_course_impl(self, course, now).await
    }

    async fn upsert_course_membership(
        &self,
        course_id: i64,
        user_id: i64,
        roles: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        Self::upsert_course_membership_impl(self, course_id, user_id, roles, now).await
    }

    async fn record_nonce(
        &self,
        scope: &str,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Self::record_nonce_impl(self, scope, nonce, expires_at, now).await
    }

    async fn consume_nonce(
        &self,
        scope: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Self::consume_nonce_impl(self, scope, nonce, now).await
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> AppResult<u64> {
        Self::purge_expired_nonces_impl(self, now).await
    }

    async fn get_oauth2_token(
        &self,
        application_instance_id: i64,
        user_id: i64,
        service: OAuth2Service,
    ) -> AppResult<Option<OAuth2Token>> {
        Self::get_oauth2_token_impl(self, application_instance_id, user_id, service).await
    }

    async fn save_oauth2_token(&self, update: &OAuth2TokenUpdate) -> AppResult<SavedOAuth2Token> {
        Self::save_oauth2_token_impl(self, update).await
    }

    async fn get_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
    ) -> AppResult<Option<JwtOAuth2Token>> {
        Self::get_jwt_oauth2_token_impl(self, lti_registration_id, scopes).await
    }

    async fn save_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<JwtOAuth2Token> {
        Self::save_jwt_oauth2_token_impl(
            self,
            lti_registration_id,
            scopes,
            access_token,
            expires_at,
            now,
        )
        .await
    }

    async fn insert_rsa_key(&self, key: &RsaKey) -> AppResult<()> {
        Self::insert_rsa_key_impl(self, key).await
    }

    async fn list_rsa_keys(&self) -> AppResult<Vec<RsaKey>> {
        Self::list_rsa_keys_impl(self).await
    }

    async fn expire_rsa_keys(&self, kids: &[String], now: DateTime<Utc>) -> AppResult<u64> {
        Self::expire_rsa_keys_impl(self, kids, now).await
    }

    async fn delete_rsa_keys(&self, kids: &[String]) -> AppResult<u64> {
        Self::delete_rsa_keys_impl(self, kids).await
    }

    async fn try_advisory_lock(
        &self,
        lock_type: LockType,
        key: i64,
    ) -> AppResult<Option<AdvisoryLock>> {
        Ok(self.locks.try_lock(lock_type, key))
    }

    async fn advisory_lock(&self, lock_type: LockType, key: i64) -> AppResult<AdvisoryLock> {
        Ok(self.locks.lock(lock_type, key).await)
    }
}
