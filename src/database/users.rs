// ABOUTME: Database operations for LMS users, per-tenant users, courses and memberships
// ABOUTME: Launch-time upserts where empty incoming values never overwrite stored ones
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use super::{column, timestamp, timestamp_column, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Course, CourseUpsert, LmsUser, User, UserUpsert};

impl Database {
    fn row_to_user(row: &SqliteRow) -> AppResult<User> {
        Ok(User {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            lti_user_id: column(row, "lti_user_id")?,
            h_userid: column(row, "h_userid")?,
            roles: column(row, "roles")?,
            email: column(row, "email")?,
            display_name: column(row, "display_name")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    fn row_to_lms_user(row: &SqliteRow) -> AppResult<LmsUser> {
        Ok(LmsUser {
            id: column(row, "id")?,
            h_userid: column(row, "h_userid")?,
            email: column(row, "email")?,
            display_name: column(row, "display_name")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    fn row_to_course(row: &SqliteRow) -> AppResult<Course> {
        Ok(Course {
            id: column(row, "id")?,
            application_instance_id: column(row, "application_instance_id")?,
            authority_provided_id: column(row, "authority_provided_id")?,
            context_id: column(row, "context_id")?,
            lms_name: column(row, "lms_name")?,
            created: timestamp_column(row, "created")?,
            updated: timestamp_column(row, "updated")?,
        })
    }

    /// Insert or refresh the cross-tenant user row
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_lms_user_impl(
        &self,
        h_userid: &str,
        email: Option<&str>,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<LmsUser> {
        let row = sqlx::query(
            r"
            INSERT INTO lms_users (h_userid, email, display_name, created, updated)
            VALUES (?1, NULLIF(?2, ''), NULLIF(?3, ''), ?4, ?4)
            ON CONFLICT (h_userid) DO UPDATE SET
                email = COALESCE(excluded.email, lms_users.email),
                display_name = COALESCE(excluded.display_name, lms_users.display_name),
                updated = excluded.updated
            RETURNING *
            ",
        )
        .bind(h_userid)
        .bind(email)
        .bind(display_name)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert LMS user: {e}")))?;

        Self::row_to_lms_user(&row)
    }

    /// Insert or refresh the per-tenant user row
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_user_impl(&self, user: &UserUpsert, now: DateTime<Utc>) -> AppResult<User> {
        let row = sqlx::query(
            r"
            INSERT INTO users
                (application_instance_id, lti_user_id, h_userid, roles, email, display_name, created, updated)
            VALUES (?1, ?2, ?3, ?4, NULLIF(?5, ''), NULLIF(?6, ''), ?7, ?7)
            ON CONFLICT (application_instance_id, lti_user_id) DO UPDATE SET
                h_userid = excluded.h_userid,
                roles = excluded.roles,
                email = COALESCE(excluded.email, users.email),
                display_name = COALESCE(excluded.display_name, users.display_name),
                updated = excluded.updated
            RETURNING *
            ",
        )
        .bind(user.application_instance_id)
        .bind(&user.lti_user_id)
        .bind(&user.h_userid)
        .bind(&user.roles)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert user: {e}")))?;

        Self::row_to_user(&row)
    }

    /// Look up a user by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_user_impl(&self, id: i64) -> AppResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    /// Look up a user by LMS user id within a tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_user_by_lti_user_id_impl(
        &self,
        application_instance_id: i64,
        lti_user_id: &str,
    ) -> AppResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE application_instance_id = ?1 AND lti_user_id = ?2")
            .bind(application_instance_id)
            .bind(lti_user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    /// Insert or refresh a course row
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_course_impl(
        &self,
        course: &CourseUpsert,
        now: DateTime<Utc>,
    ) -> AppResult<Course> {
        let row = sqlx::query(
            r"
            INSERT INTO courses
                (application_instance_id, authority_provided_id, context_id, lms_name, created, updated)
            VALUES (?1, ?2, ?3, NULLIF(?4, ''), ?5, ?5)
            ON CONFLICT (application_instance_id, authority_provided_id) DO UPDATE SET
                context_id = excluded.context_id,
                lms_name = COALESCE(excluded.lms_name, courses.lms_name),
                updated = excluded.updated
            RETURNING *
            ",
        )
        .bind(course.application_instance_id)
        .bind(&course.authority_provided_id)
        .bind(&course.context_id)
        .bind(&course.lms_name)
        .bind(timestamp(now))
        .fetch_one(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert course: {e}")))?;

        Self::row_to_course(&row)
    }

    /// Insert or refresh a membership
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_course_membership_impl(
        &self,
        course_id: i64,
        user_id: i64,
        roles: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO course_memberships (course_id, user_id, roles, updated)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (course_id, user_id) DO UPDATE SET
                roles = excluded.roles,
                updated = excluded.updated
            ",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(roles)
        .bind(timestamp(now))
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert course membership: {e}")))?;

        Ok(())
    }
}
