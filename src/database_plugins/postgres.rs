// ABOUTME: PostgreSQL database implementation for multi-worker deployments
// ABOUTME: JSONB settings, native timestamps and transaction-scoped advisory locks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
//! `PostgreSQL` database implementation
//!
//! Same interface as the `SQLite` backend. Advisory locks are real
//! `pg_advisory_xact_lock` locks held by an open transaction, so they
//! exclude every worker process sharing the database.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Decode, Pool, Postgres, QueryBuilder, Row, Type};
use tokio::time::sleep;
use tracing::{info, warn};

use super::{AdvisoryLock, DatabaseProvider, SavedOAuth2Token};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApplicationInstance, Course, CourseUpsert, JwtOAuth2Token, LmsUser, LockType, LtiRegistration,
    NewApplicationInstance, NewLtiRegistration, NewOrganization, OAuth2Service, OAuth2Token,
    OAuth2TokenUpdate, Organization, RsaKey, User, UserUpsert,
};
use crate::tenants::settings::SettingsFilter;

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 1;
/// Connections reserved for advisory lock transactions
const LOCK_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;
const CONNECT_RETRIES: u32 = 5;
const INITIAL_RETRY_DELAY_MS: u64 = 250;
const MAX_RETRY_DELAY_MS: u64 = 4_000;

fn column<'r, T>(row: &'r PgRow, name: &str) -> AppResult<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| AppError::database(format!("Failed to read column {name}: {e}")))
}

fn json_column(row: &PgRow, name: &str) -> AppResult<Value> {
    let Json(value): Json<Value> = column(row, name)?;
    Ok(value)
}

/// Advisory locks take two `int4` keys; fold the 64-bit key into the second.
fn fold_lock_key(key: i64) -> i32 {
    (key ^ (key >> 32)) as i32
}

/// `PostgreSQL` database implementation
///
/// Advisory locks are held on a separate pool so that lock waiters never
/// take the connections a lock holder needs for its own queries.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Pool<Postgres>,
    lock_pool: Pool<Postgres>,
}

impl PostgresDatabase {
    async fn connect_with_retry(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> AppResult<Pool<Postgres>> {
        let pool_options = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Some(Duration::from_secs(300)))
            .max_lifetime(Some(Duration::from_secs(600)))
            .test_before_acquire(true);

        let mut last_error = None;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 0..=CONNECT_RETRIES {
            match pool_options.clone().connect(database_url).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!("PostgreSQL connection established after {attempt} retries");
                    }
                    return Ok(pool);
                }
                Err(e) => {
                    if attempt < CONNECT_RETRIES {
                        warn!(
                            "PostgreSQL connection attempt {}/{} failed, \
                             retrying in {delay_ms}ms: {e}",
                            attempt + 1,
                            CONNECT_RETRIES + 1,
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::database(format!(
            "Failed to connect to PostgreSQL after {} attempts: {}",
            CONNECT_RETRIES + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }

    /// Connect and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or a
    /// migration fails.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let pool = Self::connect_with_retry(database_url, MAX_CONNECTIONS, MIN_CONNECTIONS).await?;
        let lock_pool = Self::connect_with_retry(database_url, LOCK_CONNECTIONS, 0).await?;
        let db = Self { pool, lock_pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> AppResult<()> {
        info!("Running PostgreSQL migrations...");
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }

    fn row_to_organization(row: &PgRow) -> AppResult<Organization> {
        Ok(Organization {
            id: column(row, "id")?,
            public_id: column(row, "public_id")?,
            name: column(row, "name")?,
            parent_id: column(row, "parent_id")?,
            enabled: column(row, "enabled")?,
            settings: json_column(row, "settings")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }

    fn row_to_registration(row: &PgRow) -> AppResult<LtiRegistration> {
        Ok(LtiRegistration {
            id: column(row, "id")?,
            issuer: column(row, "issuer")?,
            client_id: column(row, "client_id")?,
            auth_login_url: column(row, "auth_login_url")?,
            key_set_url: column(row, "key_set_url")?,
            token_url: column(row, "token_url")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }

    fn row_to_application_instance(row: &PgRow) -> AppResult<ApplicationInstance> {
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
            created: column(row, "created")?,
            updated: column(row, "updated")?,
            last_launched: column(row, "last_launched")?,
        })
    }

    fn row_to_lms_user(row: &PgRow) -> AppResult<LmsUser> {
        Ok(LmsUser {
            id: column(row, "id")?,
            h_userid: column(row, "h_userid")?,
            email: column(row, "email")?,
            display_name: column(row, "display_name")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }

    fn row_to_user(row: &PgRow) -> AppResult<User> {
        Ok(User {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            lti_user_id: column(row, "lti_user_id")?,
            h_userid: column(row, "h_userid")?,
            roles: column(row, "roles")?,
            email: column(row, "email")?,
            display_name: column(row, "display_name")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }

    fn row_to_course(row: &PgRow) -> AppResult<Course> {
        Ok(Course {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            authority_provided_id: column(row, "authority_provided_id")?,
            context_id: column(row, "context_id")?,
            lms_name: column(row, "lms_name")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }

    fn row_to_oauth2_token(row: &PgRow) -> AppResult<OAuth2Token> {
        let service: String = column(row, "service")?;
        Ok(OAuth2Token {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            user_id: column(row, "user_id")?,
            service: service.parse()?,
            access_token: column(row, "access_token")?,
            refresh_token: column(row, "refresh_token")?,
            expires_in: column(row, "expires_in")?,
            received_at: column(row, "received_at")?,
        })
    }

    fn row_to_jwt_oauth2_token(row: &PgRow) -> AppResult<JwtOAuth2Token> {
        Ok(JwtOAuth2Token {
            id: column(row, "id")?,
            lti_registration_id: column(row, "lti_registration_id")?,
            scopes: column(row, "scopes")?,
            access_token: column(row, "access_token")?,
            expires_at: column(row, "expires_at")?,
            received_at: column(row, "received_at")?,
        })
    }

    fn row_to_rsa_key(row: &PgRow) -> AppResult<RsaKey> {
        Ok(RsaKey {
            kid: column(row, "kid")?,
            jwk: json_column(row, "jwk")?,
            private_key: column(row, "private_key")?,
            aes_cipher_iv: column(row, "aes_cipher_iv")?,
            expired: column(row, "expired")?,
            created: column(row, "created")?,
            updated: column(row, "updated")?,
        })
    }
}

#[async_trait]
impl DatabaseProvider for PostgresDatabase {
    async fn new(database_url: &str) -> AppResult<Self> {
        Self::new(database_url).await
    }

    async fn migrate(&self) -> AppResult<()> {
        self.run_migrations().await
    }

    async fn create_organization(
        &self,
        organization: &NewOrganization,
        now: DateTime<Utc>,
    ) -> AppResult<Organization> {
        let row = sqlx::query(
            r"
            INSERT INTO organizations (public_id, name, parent_id, enabled, created, updated)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            ",
        )
        .bind(&organization.public_id)
        .bind(&organization.name)
        .bind(organization.parent_id)
        .bind(organization.enabled)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create organization: {e}")))?;

        Self::row_to_organization(&row)
    }

    async fn get_organization(&self, id: i64) -> AppResult<Option<Organization>> {
        sqlx::query("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get organization: {e}")))?
            .as_ref()
            .map(Self::row_to_organization)
            .transpose()
    }

    async fn get_organization_by_public_id(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>> {
        sqlx::query("SELECT * FROM organizations WHERE public_id = $1")
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get organization: {e}")))?
            .as_ref()
            .map(Self::row_to_organization)
            .transpose()
    }

    async fn update_organization_parent(
        &self,
        id: i64,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE organizations SET parent_id = $1, updated = $2 WHERE id = $3")
                .bind(parent_id)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::database(format!("Failed to update organization parent: {e}"))
                })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Organization {id}")));
        }
        Ok(())
    }

    async fn update_organization_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query("UPDATE organizations SET enabled = $1, updated = $2 WHERE id = $3")
            .bind(enabled)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to update organization: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Organization {id}")));
        }
        Ok(())
    }

    async fn create_lti_registration(
        &self,
        registration: &NewLtiRegistration,
        now: DateTime<Utc>,
    ) -> AppResult<LtiRegistration> {
        let row = sqlx::query(
            r"
            INSERT INTO lti_registrations
                (issuer, client_id, auth_login_url, key_set_url, token_url, created, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            ",
        )
        .bind(&registration.issuer)
        .bind(&registration.client_id)
        .bind(&registration.auth_login_url)
        .bind(&registration.key_set_url)
        .bind(&registration.token_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create LTI registration: {e}")))?;

        Self::row_to_registration(&row)
    }

    async fn get_lti_registration(&self, id: i64) -> AppResult<Option<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTI registration: {e}")))?
            .as_ref()
            .map(Self::row_to_registration)
            .transpose()
    }

    async fn get_lti_registration_by_client_id(
        &self,
        issuer: &str,
        client_id: &str,
    ) -> AppResult<Option<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE issuer = $1 AND client_id = $2")
            .bind(issuer)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTI registration: {e}")))?
            .as_ref()
            .map(Self::row_to_registration)
            .transpose()
    }

    async fn list_lti_registrations_by_issuer(
        &self,
        issuer: &str,
    ) -> AppResult<Vec<LtiRegistration>> {
        sqlx::query("SELECT * FROM lti_registrations WHERE issuer = $1 ORDER BY id")
            .bind(issuer)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list LTI registrations: {e}")))?
            .iter()
            .map(Self::row_to_registration)
            .collect()
    }

    async fn create_application_instance(
        &self,
        instance: &NewApplicationInstance,
        now: DateTime<Utc>,
    ) -> AppResult<ApplicationInstance> {
        instance.validate()?;
        let settings = if instance.settings.is_object() {
            instance.settings.clone()
        } else {
            Value::Object(serde_json::Map::new())
        };

        let row = sqlx::query(
            r"
            INSERT INTO application_instances
                (consumer_key, shared_secret, lti_registration_id, deployment_id,
                 lms_url, organization_id, settings, created, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            ",
        )
        .bind(&instance.consumer_key)
        .bind(&instance.shared_secret)
        .bind(instance.lti_registration_id)
        .bind(&instance.deployment_id)
        .bind(&instance.lms_url)
        .bind(instance.organization_id)
        .bind(Json(settings))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create application instance: {e}")))?;

        Self::row_to_application_instance(&row)
    }

    async fn get_application_instance(&self, id: i64) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query("SELECT * FROM application_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
            .as_ref()
            .map(Self::row_to_application_instance)
            .transpose()
    }

    async fn get_application_instance_by_consumer_key(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query("SELECT * FROM application_instances WHERE consumer_key = $1")
            .bind(consumer_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
            .as_ref()
            .map(Self::row_to_application_instance)
            .transpose()
    }

    async fn get_application_instance_by_deployment(
        &self,
        lti_registration_id: i64,
        deployment_id: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        sqlx::query(
            "SELECT * FROM application_instances WHERE lti_registration_id = $1 AND deployment_id = $2",
        )
        .bind(lti_registration_id)
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get application instance: {e}")))?
        .as_ref()
        .map(Self::row_to_application_instance)
        .transpose()
    }

    async fn update_application_instance_settings(
        &self,
        id: i64,
        settings: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE application_instances SET settings = $1, updated = $2 WHERE id = $3")
                .bind(Json(settings))
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::database(format!("Failed to update application settings: {e}"))
                })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Application instance {id}")));
        }
        Ok(())
    }

    async fn claim_tool_consumer_instance_guid(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE application_instances
            SET tool_consumer_instance_guid = $1, updated = $2
            WHERE id = $3 AND tool_consumer_instance_guid IS NULL
            ",
        )
        .bind(guid)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record instance GUID: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_application_instance_launch(
        &self,
        id: i64,
        lms_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE application_instances
            SET last_launched = $1,
                updated = $1,
                lms_url = COALESCE(NULLIF(lms_url, ''), $2)
            WHERE id = $3
            ",
        )
        .bind(now)
        .bind(lms_url)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record launch: {e}")))?;

        Ok(())
    }

    async fn find_application_instances_by_settings(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>> {
        let compiled = filter.to_postgres("settings", 1);
        let sql = format!(
            "SELECT * FROM application_instances WHERE {} ORDER BY id",
            compiled.sql
        );
        let mut query = sqlx::query(&sql);
        for bind in &compiled.binds {
            query = query.bind(bind);
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to search application settings: {e}")))?
            .iter()
            .map(Self::row_to_application_instance)
            .collect()
    }

    async fn upsert_lms_user(
        &self,
        h_userid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<LmsUser> {
        let row = sqlx::query(
            r"
            INSERT INTO lms_users (h_userid, email, display_name, created, updated)
            VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), $4, $4)
            ON CONFLICT (h_userid) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, lms_users.email),
                display_name = COALESCE(EXCLUDED.display_name, lms_users.display_name),
                updated = EXCLUDED.updated
            RETURNING *
            ",
        )
        .bind(h_userid)
        .bind(email)
        .bind(display_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert LMS user: {e}")))?;

        Self::row_to_lms_user(&row)
    }

    async fn upsert_user(&self, user: &UserUpsert, now: DateTime<Utc>) -> AppResult<User> {
        let row = sqlx::query(
            r"
            INSERT INTO users
                (application_instance_id, lti_user_id, h_userid, roles, email, display_name, created, updated)
            VALUES ($1, $2, $3, $4, NULLIF($5, ''), NULLIF($6, ''), $7, $7)
            ON CONFLICT (application_instance_id, lti_user_id) DO UPDATE SET
                h_userid = EXCLUDED.h_userid,
                roles = EXCLUDED.roles,
                email = COALESCE(EXCLUDED.email, users.email),
                display_name = COALESCE(EXCLUDED.display_name, users.display_name),
                updated = EXCLUDED.updated
            RETURNING *
            ",
        )
        .bind(user.application_instance_id)
        .bind(&user.lti_user_id)
        .bind(&user.h_userid)
        .bind(&user.roles)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert user: {e}")))?;

        Self::row_to_user(&row)
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    async fn get_user_by_lti_user_id(
        &self,
        application_instance_id: i64,
        lti_user_id: &str,
    ) -> AppResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE application_instance_id = $1 AND lti_user_id = $2")
            .bind(application_instance_id)
            .bind(lti_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    async fn upsert_course(&self, course: &CourseUpsert, now: DateTime<Utc>) -> AppResult<Course> {
        let row = sqlx::query(
            r"
            INSERT INTO courses
                (application_instance_id, authority_provided_id, context_id, lms_name, created, updated)
            VALUES ($1, $2, $3, NULLIF($4, ''), $5, $5)
            ON CONFLICT (application_instance_id, authority_provided_id) DO UPDATE SET
                context_id = EXCLUDED.context_id,
                lms_name = COALESCE(EXCLUDED.lms_name, courses.lms_name),
                updated = EXCLUDED.updated
            RETURNING *
            ",
        )
        .bind(course.application_instance_id)
        .bind(&course.authority_provided_id)
        .bind(&course.context_id)
        .bind(&course.lms_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert course: {e}")))?;

        Self::row_to_course(&row)
    }

    async fn upsert_course_membership(
        &self,
        course_id: i64,
        user_id: i64,
        roles: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO course_memberships (course_id, user_id, roles, updated)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_id, user_id) DO UPDATE SET
                roles = EXCLUDED.roles,
                updated = EXCLUDED.updated
            ",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(roles)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert course membership: {e}")))?;

        Ok(())
    }

    async fn record_nonce(
        &self,
        scope: &str,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO nonces (scope, nonce, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope, nonce) DO UPDATE SET expires_at = EXCLUDED.expires_at
            WHERE nonces.expires_at <= $4
            ",
        )
        .bind(scope)
        .bind(nonce)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record nonce: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn consume_nonce(
        &self,
        scope: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM nonces WHERE scope = $1 AND nonce = $2 AND expires_at > $3")
                .bind(scope)
                .bind(nonce)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to consume nonce: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM nonces WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to purge nonces: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn get_oauth2_token(
        &self,
        application_instance_id: i64,
        user_id: i64,
        service: OAuth2Service,
    ) -> AppResult<Option<OAuth2Token>> {
        sqlx::query(
            r"
            SELECT * FROM oauth2_tokens
            WHERE application_instance_id = $1 AND user_id = $2 AND service = $3
            ",
        )
        .bind(application_instance_id)
        .bind(user_id)
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get OAuth2 token: {e}")))?
        .as_ref()
        .map(Self::row_to_oauth2_token)
        .transpose()
    }

    async fn save_oauth2_token(&self, update: &OAuth2TokenUpdate) -> AppResult<SavedOAuth2Token> {
        let previous_refresh_token = self
            .get_oauth2_token(update.application_instance_id, update.user_id, update.service)
            .await?
            .and_then(|token| token.refresh_token);

        let row = sqlx::query(
            r"
            INSERT INTO oauth2_tokens
                (application_instance_id, user_id, service, access_token, refresh_token, expires_in, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (application_instance_id, user_id, service) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, oauth2_tokens.refresh_token),
                expires_in = EXCLUDED.expires_in,
                received_at = EXCLUDED.received_at
            RETURNING *
            ",
        )
        .bind(update.application_instance_id)
        .bind(update.user_id)
        .bind(update.service.as_str())
        .bind(&update.access_token)
        .bind(&update.refresh_token)
        .bind(update.expires_in)
        .bind(update.received_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save OAuth2 token: {e}")))?;

        Ok(SavedOAuth2Token {
            token: Self::row_to_oauth2_token(&row)?,
            previous_refresh_token,
        })
    }

    async fn get_jwt_oauth2_token(
        &self,
        lti_registration_id: i64,
        scopes: &str,
    ) -> AppResult<Option<JwtOAuth2Token>> {
        sqlx::query("SELECT * FROM jwt_oauth2_tokens WHERE lti_registration_id = $1 AND scopes = $2")
            .bind(lti_registration_id)
            .bind(scopes)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to get LTIA token: {e}")))?
            .as_ref()
            .map(Self::row_to_jwt_oauth2_token)
            .transpose()
    }

    async fn save_jwt_oauth2_token(
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
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (lti_registration_id, scopes) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                expires_at = EXCLUDED.expires_at,
                received_at = EXCLUDED.received_at
            RETURNING *
            ",
        )
        .bind(lti_registration_id)
        .bind(scopes)
        .bind(access_token)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save LTIA token: {e}")))?;

        Self::row_to_jwt_oauth2_token(&row)
    }

    async fn insert_rsa_key(&self, key: &RsaKey) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO rsa_keys (kid, jwk, private_key, aes_cipher_iv, expired, created, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&key.kid)
        .bind(Json(&key.jwk))
        .bind(&key.private_key)
        .bind(&key.aes_cipher_iv)
        .bind(key.expired)
        .bind(key.created)
        .bind(key.updated)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to insert RSA key: {e}")))?;

        Ok(())
    }

    async fn list_rsa_keys(&self) -> AppResult<Vec<RsaKey>> {
        sqlx::query("SELECT * FROM rsa_keys ORDER BY created, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list RSA keys: {e}")))?
            .iter()
            .map(Self::row_to_rsa_key)
            .collect()
    }

    async fn expire_rsa_keys(&self, kids: &[String], now: DateTime<Utc>) -> AppResult<u64> {
        if kids.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE rsa_keys SET expired = TRUE, updated = ");
        builder.push_bind(now);
        builder.push(" WHERE kid = ANY(");
        builder.push_bind(kids.to_vec());
        builder.push(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to expire RSA keys: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn delete_rsa_keys(&self, kids: &[String]) -> AppResult<u64> {
        if kids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM rsa_keys WHERE kid = ANY($1)")
            .bind(kids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete RSA keys: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn try_advisory_lock(
        &self,
        lock_type: LockType,
        key: i64,
    ) -> AppResult<Option<AdvisoryLock>> {
        let mut transaction = self
            .lock_pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to open lock transaction: {e}")))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1, $2)")
            .bind(lock_type.as_i32())
            .bind(fold_lock_key(key))
            .fetch_one(&mut *transaction)
            .await
            .map_err(|e| AppError::database(format!("Failed to try advisory lock: {e}")))?;

        if acquired {
            Ok(Some(AdvisoryLock::postgres(transaction)))
        } else {
            transaction
                .rollback()
                .await
                .map_err(|e| AppError::database(format!("Failed to close lock transaction: {e}")))?;
            Ok(None)
        }
    }

    async fn advisory_lock(&self, lock_type: LockType, key: i64) -> AppResult<AdvisoryLock> {
        let mut transaction = self
            .lock_pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to open lock transaction: {e}")))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(lock_type.as_i32())
            .bind(fold_lock_key(key))
            .execute(&mut *transaction)
            .await
            .map_err(|e| AppError::database(format!("Failed to take advisory lock: {e}")))?;

        Ok(AdvisoryLock::postgres(transaction))
    }
}
