// ABOUTME: User-side models: per-tenant users, cross-tenant LMS users, course groupings
// ABOUTME: Upsert DTOs consumed by the identity deriver on every launch
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as seen by one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Numeric primary key
    pub id: i64,
    /// Tenant
    pub application_instance_id: i64,
    /// LMS user id (`user_id` / `sub`)
    pub lti_user_id: String,
    /// Authority-scoped pseudonymous id
    pub h_userid: String,
    /// Raw LTI roles string from the latest launch
    pub roles: String,
    /// Latest known email
    pub email: Option<String>,
    /// Latest known display name
    pub display_name: Option<String>,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub updated: DateTime<Utc>,
}

/// Values written to a [`User`] row on launch
#[derive(Debug, Clone)]
pub struct UserUpsert {
    /// Tenant
    pub application_instance_id: i64,
    /// LMS user id
    pub lti_user_id: String,
    /// Hypothesis account id
    pub h_userid: String,
    /// Raw roles string from the launch
    pub roles: String,
    /// Email address, when the LMS shares it
    pub email: Option<String>,
    /// Display name
    pub display_name: Option<String>,
}

/// One row per `h_userid` across all tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsUser {
    /// Row id
    pub id: i64,
    /// Hypothesis account id
    pub h_userid: String,
    /// Email address, when the LMS shares it
    pub email: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Row creation time
    pub created: DateTime<Utc>,
    /// Last update time
    pub updated: DateTime<Utc>,
}

/// Course grouping derived from the LMS context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Row id
    pub id: i64,
    /// Tenant
    pub application_instance_id: i64,
    /// Hex SHA-1 of `guid:context_id`
    pub authority_provided_id: String,
    /// LMS context id
    pub context_id: String,
    /// Context title from the latest launch
    pub lms_name: Option<String>,
    /// Row creation time
    pub created: DateTime<Utc>,
    /// Last update time
    pub updated: DateTime<Utc>,
}

/// Values written to a [`Course`] row on launch
#[derive(Debug, Clone)]
pub struct CourseUpsert {
    /// Tenant
    pub application_instance_id: i64,
    /// Hex SHA-1 of `guid:context_id`
    pub authority_provided_id: String,
    /// LMS context id
    pub context_id: String,
    /// Context title from the latest launch
    pub lms_name: Option<String>,
}
