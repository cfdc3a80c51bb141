// ABOUTME: Backend selection for the tenant store from DATABASE_URL
// ABOUTME: SQLite for single-process deployments, PostgreSQL (feature-gated) for worker fleets sharing locks and nonces
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;
use url::Url;

use super::{AdvisoryLock, DatabaseProvider, SavedOAuth2Token};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApplicationInstance, Course, CourseUpsert, JwtOAuth2Token, LmsUser, LockType, LtiRegistration,
    NewApplicationInstance, NewLtiRegistration, NewOrganization, OAuth2Service, OAuth2Token,
    OAuth2TokenUpdate, Organization, RsaKey, User, UserUpsert,
};
use crate::tenants::settings::SettingsFilter;

#[cfg(feature = "postgresql")]
use super::postgres::PostgresDatabase;
use crate::database::Database as SqliteDatabase;

/// Storage backend named by a connection URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    /// Embedded, one process
    SQLite,
    /// Shared by every worker
    PostgreSQL,
}

impl DatabaseType {
    /// Backend for `database_url`
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for any scheme other than `sqlite:` and
    /// `postgres(ql)://`.
    pub fn detect(database_url: &str) -> AppResult<Self> {
        if database_url.starts_with("sqlite:") {
            return Ok(Self::SQLite);
        }
        if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            return Ok(Self::PostgreSQL);
        }
        Err(AppError::config(format!(
            "DATABASE_URL must start with sqlite: or postgres://, got {}",
            redact_database_url(database_url)
        )))
    }
}

/// Tenant store, dispatching to the configured backend
#[derive(Clone)]
pub enum Database {
    /// `sqlite:` URLs
    SQLite(SqliteDatabase),
    /// `postgres://` URLs
    #[cfg(feature = "postgresql")]
    PostgreSQL(PostgresDatabase),
}

macro_rules! dispatch {
    ($self:ident, $db:ident => $call:expr) => {
        match $self {
            Self::SQLite($db) => $call,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL($db) => $call,
        }
    };
}

impl Database {
    /// Short backend description for startup logs
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::SQLite(_) => "SQLite (single process)",
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(_) => "PostgreSQL (multi-worker)",
        }
    }

    async fn connect(database_url: &str) -> AppResult<Self> {
        let backend = DatabaseType::detect(database_url)?;
        info!(
            ?backend,
            url = %redact_database_url(database_url),
            "Connecting tenant store"
        );
        match backend {
            DatabaseType::SQLite => Ok(Self::SQLite(SqliteDatabase::new(database_url).await?)),
            #[cfg(feature = "postgresql")]
            DatabaseType::PostgreSQL => {
                Ok(Self::PostgreSQL(PostgresDatabase::new(database_url).await?))
            }
            #[cfg(not(feature = "postgresql"))]
            DatabaseType::PostgreSQL => Err(AppError::config(
                "DATABASE_URL names PostgreSQL but this build lacks the postgresql feature",
            )),
        }
    }
}

/// `database_url` with any password replaced by `***`
#[must_use]
pub fn redact_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            // only fails for URLs that cannot carry credentials
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => database_url.to_owned(),
    }
}

#[async_trait]
impl DatabaseProvider for Database {
    async fn new(database_url: &str) -> AppResult<Self> {
        Self::connect(database_url).await
    }

    async fn migrate(&self) -> AppResult<()> {
        dispatch!(self, db => db.migrate().await)
    }

    async fn create_organization(
        &self,
        organization: &NewOrganization,
        now: DateTime<Utc>,
    ) -> AppResult<Organization> {
        dispatch!(self, db => db.create_organization(organization, now).await)
    }

    async fn get_organization(&self, id: i64) -> AppResult<Option<Organization>> {
        dispatch!(self, db => db.get_organization(id).await)
    }

    async fn get_organization_by_public_id(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>> {
        dispatch!(self, db => db.get_organization_by_public_id(public_id).await)
    }

    async fn update_organization_parent(
        &self,
        id: i64,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        dispatch!(self, db => db.update_organization_parent(id, parent_id, now).await)
    }

    async fn update_organization_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        dispatch!(self, db => db.update_organization_enabled(id, enabled, now).await)
    }

    #[tracing::instrument(
        skip(self, registration),
        fields(db_operation = "create_lti_registration", issuer = %registration.issuer)
    )]
    async fn create_lti_registration(
        &self,
        registration: &NewLtiRegistration,
        now: DateTime<Utc>,
    ) -> AppResult<LtiRegistration> {
        dispatch!(self, db => db.create_lti_registration(registration, now).await)
    }

    async fn get_lti_registration(&self, id: i64) -> AppResult<Option<LtiRegistration>> {
        dispatch!(self, db => db.get_lti_registration(id).await)
    }

    async fn get_lti_registration_by_client_id(
        &self,
        issuer: &str,
        client_id: &str,
    ) -> AppResult<Option<LtiRegistration>> {
        dispatch!(self, db => db.get_lti_registration_by_client_id(issuer, client_id).await)
    }

    async fn list_lti_registrations_by_issuer(
        &self,
        issuer: &str,
    ) -> AppResult<Vec<LtiRegistration>> {
        dispatch!(self, db => db.list_lti_registrations_by_issuer(issuer).await)
    }

    #[tracing::instrument(
        skip(self, instance),
        fields(db_operation = "create_application_instance")
    )]
    async fn create_application_instance(
        &self,
        instance: &NewApplicationInstance,
        now: DateTime<Utc>,
    ) -> AppResult<ApplicationInstance> {
        dispatch!(self, db => db.create_application_instance(instance, now).await)
    }

    async fn get_application_instance(&self, id: i64) -> AppResult<Option<ApplicationInstance>> {
        dispatch!(self, db => db.get_application_instance(id).await)
    }

    async fn get_application_instance_by_consumer_key(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        dispatch!(self, db => db.get_application_instance_by_consumer_key(consumer_key).await)
    }

    async fn get_application_instance_by_deployment(
        &self,
        lti_registration_id: i64,
        deployment_id: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        dispatch!(self, db => {
            db.get_application_instance_by_deployment(lti_registration_id, deployment_id)
                .await
        })
    }

    async fn update_application_instance_settings(
        &self,
        id: i64,
        settings: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        dispatch!(self, db => db.update_application_instance_settings(id, settings, now).await)
    }

    async fn claim_tool_consumer_instance_guid(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        dispatch!(self, db => db.claim_tool_consumer_instance_guid(id, guid, now).await)
    }

    async fn record_application_instance_launch(
        &self,
        id: i64,
        lms_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        dispatch!(self, db => db.record_application_instance_launch(id, lms_url, now).await)
    }

    async fn find_application_instances_by_settings(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>> {
        dispatch!(self, db => db.find_application_instances_by_settings(filter).await)
    }

    async fn upsert_lms_user(
        &self,
        h_userid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<LmsUser> {
        dispatch!(self, db => db.upsert_lms_user(h_userid, email, display_name, now).await)
    }

    async fn upsert_user(&self, user: &UserUpsert, now: DateTime<Utc>) -> AppResult<User> {
        dispatch!(self, db => db.upsert_user(user, now).await)
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        dispatch!(self, db => db.get_user(id).await)
    }

    async fn get_user_by_lti_user_id(
        &self,
        application_instance_id: i64,
        lti_user_id: &str,
    ) -> AppResult<Option<User>> {
        dispatch!(self, db => db.get_user_by_lti_user_id(application_instance_id, lti_user_id).await)
    }

    async fn upsert_course(&self, course: &CourseUpsert, now: DateTime<Utc>) -> AppResult<Course> {
        dispatch!(self, db => db.upsert_course(course, now).await)
    }

    async fn upsert_course_membership(
        &self,
        course_id: i64,
        user_id: i64,
        roles: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        dispatch!(self, db => db.upsert_course_membership(course_id, user_id, roles, now).await)
    }

    async fn record_nonce(
        &self,
        scope: &str,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        dispatch!(self, db => db.record_nonce(scope, nonce, expires_at, now).await)
    }

    async fn consume_nonce(
        &self,
        scope: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        dispatch!(self, db => db.consume_nonce(scope, nonce, now).await)
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> AppResult<u64> {
        dispatch!(self, db => db.purge_expired_nonces(now).await)
    }

    async fn get_oauth2_token(
        &self,
        application_instance_id: i64,
        user_id: i64,
        service: OAuth2Service,
    ) -> AppResult<Option<OAuth2Token>> {
        dispatch!(self, db => db.get_oauth2_token(application_instance_id, user_id, service).await)
    }

    #[tracing::instrument(
        skip(self, update),
        fields(db_operation = "save_oauth2_token", service = %update.service)
    )]
    async fn save_oauth2_token(&self, update: &OAuth2TokenUpdate) -> AppResult<SavedOAuth2Token> {
        dispatch!(self, db => db.save_oauth2_token(update).await)
    }

    async fn get_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
    ) -> AppResult<Option<JwtOAuth2Token>> {
        dispatch!(self, db => db.get_jwt_oauth2_token(lti_registration_id, scopes).await)
    }

    async fn save_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<JwtOAuth2Token> {
        dispatch!(self, db => {
            db.save_jwt_oauth2_token(lti_registration_id, scopes, access_token, expires_at, now)
                .await
        })
    }

    async fn insert_rsa_key(&self, key: &RsaKey) -> AppResult<()> {
        dispatch!(self, db => db.insert_rsa_key(key).await)
    }

    async fn list_rsa_keys(&self) -> AppResult<Vec<RsaKey>> {
        dispatch!(self, db => db.list_rsa_keys().await)
    }

    async fn expire_rsa_keys(&self, kids: &[String], now: DateTime<Utc>) -> AppResult<u64> {
        dispatch!(self, db => db.expire_rsa_keys(kids, now).await)
    }

    async fn delete_rsa_keys(&self, kids: &[String]) -> AppResult<u64> {
        dispatch!(self, db => db.delete_rsa_keys(kids).await)
    }

    async fn try_advisory_lock(
        &self,
        lock_type: LockType,
        key: i64,
    ) -> AppResult<Option<AdvisoryLock>> {
        dispatch!(self, db => db.try_advisory_lock(lock_type, key).await)
    }

    async fn advisory_lock(&self, lock_type: LockType, key: i64) -> AppResult<AdvisoryLock> {
        dispatch!(self, db => db.advisory_lock(lock_type, key).await)
    }
}
