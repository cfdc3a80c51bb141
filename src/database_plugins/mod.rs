// ABOUTME: Database abstraction layer for the LTI launch core
// ABOUTME: Plugin architecture with SQLite and PostgreSQL backends behind one async trait
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[cfg(feature = "postgresql")]
use sqlx::{Postgres, Transaction};

#[cfg(feature = "postgresql")]
use crate::errors::AppError;
use crate::database::LocalLockGuard;
use crate::errors::AppResult;
use crate::models::{
    ApplicationInstance, Course, CourseUpsert, JwtOAuth2Token, LmsUser, LockType, LtiRegistration,
    NewApplicationInstance, NewLtiRegistration, NewOrganization, OAuth2Service, OAuth2Token,
    OAuth2TokenUpdate, Organization, RsaKey, User, UserUpsert,
};
use crate::tenants::settings::SettingsFilter;

/// Database provider factory
pub mod factory;

/// PostgreSQL database implementation
#[cfg(feature = "postgresql")]
pub mod postgres;

/// Result of [`DatabaseProvider::save_oauth2_token`]
#[derive(Debug, Clone)]
pub struct SavedOAuth2Token {
    /// Row as stored
    pub token: OAuth2Token,
    /// Refresh token the row held before the save
    pub previous_refresh_token: Option<String>,
}

enum LockHandle {
    Local(LocalLockGuard),
    #[cfg(feature = "postgresql")]
    Postgres(Transaction<'static, Postgres>),
}

/// Held advisory lock
///
/// Released by [`AdvisoryLock::release`] or, on any other exit path, when
/// dropped (the PostgreSQL transaction rolls back, which frees the
/// transaction-scoped lock).
pub struct AdvisoryLock {
    handle: LockHandle,
}

impl AdvisoryLock {
    pub(crate) fn local(guard: LocalLockGuard) -> Self {
        Self {
            handle: LockHandle::Local(guard),
        }
    }

    #[cfg(feature = "postgresql")]
    pub(crate) fn postgres(transaction: Transaction<'static, Postgres>) -> Self {
        Self {
            handle: LockHandle::Postgres(transaction),
        }
    }

    /// End the lock's transaction
    ///
    /// # Errors
    ///
    /// Returns a database error if the PostgreSQL commit fails.
    pub async fn release(self) -> AppResult<()> {
        match self.handle {
            LockHandle::Local(guard) => {
                drop(guard);
                Ok(())
            }
            #[cfg(feature = "postgresql")]
            LockHandle::Postgres(transaction) => transaction
                .commit()
                .await
                .map_err(|e| AppError::database(format!("Failed to release advisory lock: {e}"))),
        }
    }
}

/// Fold an arbitrary identity into an advisory lock key
#[must_use]
pub fn lock_key_for(parts: &[&str]) -> i64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes) & i64::MAX
}

/// Core database abstraction trait
///
/// Every timestamp written is passed in by the caller, which owns the clock.
#[async_trait]
pub trait DatabaseProvider: Send + Sync + Clone {
    /// Connect and run migrations
    async fn new(database_url: &str) -> AppResult<Self>
    where
        Self: Sized;

    /// Run database migrations to set up schema
    async fn migrate(&self) -> AppResult<()>;

    // ================================
    // Organizations
    // ================================

    /// Create an organization
    async fn create_organization(
        &self,
        organization: &NewOrganization,
        now: DateTime<Utc>,
    ) -> AppResult<Organization>;

    /// Get organization by id
    async fn get_organization(&self, id: i64) -> AppResult<Option<Organization>>;

    /// Get organization by public id
    async fn get_organization_by_public_id(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>>;

    /// Replace an organization's parent (chain validated by the caller)
    async fn update_organization_parent(
        &self,
        id: i64,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Enable or disable an organization
    async fn update_organization_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    // ================================
    // LTI 1.3 registrations
    // ================================

    /// Create a registration
    async fn create_lti_registration(
        &self,
        registration: &NewLtiRegistration,
        now: DateTime<Utc>,
    ) -> AppResult<LtiRegistration>;

    /// Get registration by id
    async fn get_lti_registration(&self, id: i64) -> AppResult<Option<LtiRegistration>>;

    /// Get registration by `(issuer, client_id)`
    async fn get_lti_registration_by_client_id(
        &self,
        issuer: &str,
        client_id: &str,
    ) -> AppResult<Option<LtiRegistration>>;

    /// All registrations of one issuer
    async fn list_lti_registrations_by_issuer(
        &self,
        issuer: &str,
    ) -> AppResult<Vec<LtiRegistration>>;

    // ================================
    // Application instances
    // ================================

    /// Create an application instance
    async fn create_application_instance(
        &self,
        instance: &NewApplicationInstance,
        now: DateTime<Utc>,
    ) -> AppResult<ApplicationInstance>;

    /// Get application instance by id
    async fn get_application_instance(&self, id: i64) -> AppResult<Option<ApplicationInstance>>;

    /// Get application instance by LTI 1.1 consumer key
    async fn get_application_instance_by_consumer_key(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>>;

    /// Get application instance by LTI 1.3 deployment
    async fn get_application_instance_by_deployment(
        &self,
        lti_registration_id: i64,
        deployment_id: &str,
    ) -> AppResult<Option<ApplicationInstance>>;

    /// Persist the whole settings document
    async fn update_application_instance_settings(
        &self,
        id: i64,
        settings: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Set the GUID only if none is recorded; true when this call set it
    async fn claim_tool_consumer_instance_guid(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Touch `updated`/`last_launched`; fill `lms_url` when empty
    async fn record_application_instance_launch(
        &self,
        id: i64,
        lms_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Application instances whose settings satisfy `filter`
    async fn find_application_instances_by_settings(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>>;

    // ================================
    // Users and courses
    // ================================

    /// Upsert the cross-tenant user; empty values never overwrite
    async fn upsert_lms_user(
        &self,
        h_userid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<LmsUser>;

    /// Upsert the per-tenant user
    async fn upsert_user(&self, user: &UserUpsert, now: DateTime<Utc>) -> AppResult<User>;

    /// Get user by id
    async fn get_user(&self, id: i64) -> AppResult<Option<User>>;

    /// Get user by `(tenant, lti_user_id)`
    async fn get_user_by_lti_user_id(
        &self,
        application_instance_id: i64,
        lti_user_id: &str,
    ) -> AppResult<Option<User>>;

    /// Upsert the course grouping row
    async fn upsert_course(&self, course: &CourseUpsert, now: DateTime<Utc>) -> AppResult<Course>;

    /// Upsert a course membership
    async fn upsert_course_membership(
        &self,
        course_id: i64,
        user_id: i64,
        roles: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    // ================================
    // Nonces
    // ================================

    /// Record a nonce; false when an unexpired entry already exists
    async fn record_nonce(
        &self,
        scope: &str,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Delete an unexpired nonce; true when it existed
    async fn consume_nonce(&self, scope: &str, nonce: &str, now: DateTime<Utc>)
        -> AppResult<bool>;

    /// Delete expired nonces
    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> AppResult<u64>;

    // ================================
    // OAuth2 tokens
    // ================================

    /// Get the token for `(tenant, user, service)`
    async fn get_oauth2_token(
        &self,
        application_instance_id: i64,
        user_id: i64,
        service: OAuth2Service,
    ) -> AppResult<Option<OAuth2Token>>;

    /// Upsert token fields; a `None` refresh token keeps the stored one
    async fn save_oauth2_token(&self, update: &OAuth2TokenUpdate) -> AppResult<SavedOAuth2Token>;

    // ================================
    // LTI Advantage client-credentials tokens
    // ================================

    /// Get the token for `(registration, scopes)`
    async fn get_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
    ) -> AppResult<Option<JwtOAuth2Token>>;

    /// Upsert the token for `(registration, scopes)`
    async fn save_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<JwtOAuth2Token>;

    // ================================
    // RSA keyset
    // ================================

    /// Store a new key
    async fn insert_rsa_key(&self, key: &RsaKey) -> AppResult<()>;

    /// All keys, oldest first
    async fn list_rsa_keys(&self) -> AppResult<Vec<RsaKey>>;

    /// Mark keys expired
    async fn expire_rsa_keys(&self, kids: &[String], now: DateTime<Utc>) -> AppResult<u64>;

    /// Delete keys
    async fn delete_rsa_keys(&self, kids: &[String]) -> AppResult<u64>;

    // ================================
    // Advisory locks
    // ================================

    /// Try to take the lock `(lock_type, key)` without waiting
    async fn try_advisory_lock(
        &self,
        lock_type: LockType,
        key: i64,
    ) -> AppResult<Option<AdvisoryLock>>;

    /// Take the lock `(lock_type, key)`, waiting for the holder to finish
    async fn advisory_lock(&self, lock_type: LockType, key: i64) -> AppResult<AdvisoryLock>;
}
