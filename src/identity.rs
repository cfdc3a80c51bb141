// ABOUTME: Pseudonymous identity derivation shared with the annotation service
// ABOUTME: h_userid and group ids from the LMS GUID, display-name normalization, per-launch user and course upserts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Identity deriver
//!
//! `h_userid = "acct:" + lower(base32(sha1(guid ":" user_id)))[..30] + "@" + authority`
//!
//! Group ids use the lowercase hex SHA-1 of `guid ":" context_id`. Both are
//! pure functions of their inputs, so every worker derives the same ids.

use std::sync::Arc;

use data_encoding::BASE32_NOPAD;
use ring::digest;
use serde::Serialize;
use tracing::debug;

use crate::clock::SharedClock;
use crate::constants::limits::{H_USERNAME_LEN, MAX_DISPLAY_NAME_CHARS};
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::lti::LaunchContext;
use crate::models::{Course, CourseUpsert, LmsUser, User, UserUpsert};

/// Display name used when the LMS sent none
pub const ANONYMOUS: &str = "Anonymous";

fn sha1(guid: &str, value: &str) -> digest::Digest {
    digest::digest(
        &digest::SHA1_FOR_LEGACY_USE_ONLY,
        format!("{guid}:{value}").as_bytes(),
    )
}

/// Local part of an `h_userid`: 30 lowercase base32 characters
#[must_use]
pub fn h_username(guid: &str, user_id: &str) -> String {
    let mut encoded = BASE32_NOPAD.encode(sha1(guid, user_id).as_ref());
    encoded.truncate(H_USERNAME_LEN);
    encoded.to_ascii_lowercase()
}

/// Authority-scoped pseudonymous user id
#[must_use]
pub fn h_userid(guid: &str, user_id: &str, authority: &str) -> String {
    format!("acct:{}@{authority}", h_username(guid, user_id))
}

/// Course grouping id: hex SHA-1 of `guid:context_id`
#[must_use]
pub fn authority_provided_id(guid: &str, context_id: &str) -> String {
    hex::encode(sha1(guid, context_id).as_ref())
}

/// Group id exposed to the annotation client
#[must_use]
pub fn group_id(authority_provided_id: &str, authority: &str) -> String {
    format!("group:{authority_provided_id}@{authority}")
}

/// Normalize an LMS-supplied name for display
///
/// Prefers the full name, then `given family`, then [`ANONYMOUS`]; names
/// longer than the display limit are cut and end in an ellipsis.
#[must_use]
pub fn display_name(full: Option<&str>, given: Option<&str>, family: Option<&str>) -> String {
    let full = full.map(str::trim).filter(|name| !name.is_empty());
    let name = full.map_or_else(
        || {
            [given, family]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        },
        str::to_owned,
    );
    let name = if name.is_empty() {
        ANONYMOUS.to_owned()
    } else {
        name
    };

    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        let mut truncated: String = name.chars().take(MAX_DISPLAY_NAME_CHARS - 1).collect();
        truncated.push('…');
        truncated
    } else {
        name
    }
}

/// Records written for one launch
#[derive(Debug, Clone, Serialize)]
pub struct LaunchIdentity {
    /// Hypothesis account id
    pub h_userid: String,
    /// Cross-tenant user row
    pub lms_user: LmsUser,
    /// Per-tenant user row
    pub user: User,
    /// Course the launch came from
    pub course: Course,
    /// `group:<authority_provided_id>@<authority>`
    pub group_id: String,
}

/// Derives identities and persists them on launch
#[derive(Clone)]
pub struct IdentityDeriver {
    db: Arc<Database>,
    clock: SharedClock,
    authority: String,
}

impl IdentityDeriver {
    /// Create a deriver for `authority`
    #[must_use]
    pub const fn new(db: Arc<Database>, clock: SharedClock, authority: String) -> Self {
        Self {
            db,
            clock,
            authority,
        }
    }

    /// `h_userid` for a user of the tenant identified by `guid`
    #[must_use]
    pub fn h_userid(&self, guid: &str, user_id: &str) -> String {
        h_userid(guid, user_id, &self.authority)
    }

    /// Upsert the LMS user, tenant user, course and membership for a launch
    ///
    /// Every write is an idempotent upsert, so a retried launch converges on
    /// the same rows.
    ///
    /// # Errors
    ///
    /// Returns `MissingLaunchParam` when neither the tenant nor the launch
    /// knows the LMS GUID, since ids derived without one would collide across
    /// tenants. Propagates database errors.
    pub async fn upsert_for_launch(&self, context: &LaunchContext) -> AppResult<LaunchIdentity> {
        let now = self.clock.now();
        let guid = context
            .guid()
            .filter(|guid| !guid.is_empty())
            .ok_or_else(|| AppError::missing_launch_param("tool_consumer_instance_guid"))?;
        let h_userid = self.h_userid(guid, &context.user.user_id);
        let email = context.user.email.as_deref();
        let display = context.user.display_name.as_str();

        let lms_user = self
            .db
            .upsert_lms_user(&h_userid, email, Some(display), now)
            .await?;
        let user = self
            .db
            .upsert_user(
                &UserUpsert {
                    application_instance_id: context.instance.id,
                    lti_user_id: context.user.user_id.clone(),
                    h_userid: h_userid.clone(),
                    roles: context.user.raw_roles.clone(),
                    email: context.user.email.clone(),
                    display_name: Some(context.user.display_name.clone()),
                },
                now,
            )
            .await?;

        let authority_provided_id = authority_provided_id(guid, &context.context_id);
        let course = self
            .db
            .upsert_course(
                &CourseUpsert {
                    application_instance_id: context.instance.id,
                    authority_provided_id: authority_provided_id.clone(),
                    context_id: context.context_id.clone(),
                    lms_name: context.context_title.clone(),
                },
                now,
            )
            .await?;
        self.db
            .upsert_course_membership(course.id, user.id, &context.user.raw_roles, now)
            .await?;

        debug!(
            application_instance_id = context.instance.id,
            user_id = user.id,
            course_id = course.id,
            "Launch identity recorded"
        );
        Ok(LaunchIdentity {
            group_id: group_id(&authority_provided_id, &self.authority),
            h_userid,
            lms_user,
            user,
            course,
        })
    }
}
