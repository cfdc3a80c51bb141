// ABOUTME: Tenant-side models: organizations, LTI 1.3 registrations, application instances
// ABOUTME: Includes creation DTOs and the credential-pair invariant for application instances
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AppError, AppResult};

/// LTI protocol variant a launch arrived with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LtiVersion {
    /// OAuth 1.0a signed form post
    #[serde(rename = "1.1")]
    V11,
    /// OIDC login plus signed `id_token`
    #[serde(rename = "1.3")]
    V13,
}

impl LtiVersion {
    /// Wire form (`"1.1"` / `"1.3"`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V11 => "1.1",
            Self::V13 => "1.3",
        }
    }
}

impl fmt::Display for LtiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical grouping of tenants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    /// Numeric primary key
    pub id: i64,
    /// Stable opaque identifier exposed outside the database
    pub public_id: String,
    /// Display name
    pub name: Option<String>,
    /// Parent organization, if any
    pub parent_id: Option<i64>,
    /// Launches under a disabled organization are refused
    pub enabled: bool,
    /// Free-form settings
    pub settings: Value,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub updated: DateTime<Utc>,
}

/// Fields required to create an [`Organization`]
#[derive(Debug, Clone, Default)]
pub struct NewOrganization {
    /// Stable opaque identifier; must be unique
    pub public_id: String,
    /// Display name
    pub name: Option<String>,
    /// Parent organization
    pub parent_id: Option<i64>,
    /// Initial enabled flag
    pub enabled: bool,
}

/// Platform-level LTI 1.3 registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LtiRegistration {
    /// Numeric primary key
    pub id: i64,
    /// Platform issuer (`iss` of its id tokens)
    pub issuer: String,
    /// Client id the platform issued to this tool
    pub client_id: String,
    /// Platform OIDC authorization endpoint
    pub auth_login_url: String,
    /// Platform JWKS URL
    pub key_set_url: String,
    /// Platform OAuth2 token endpoint for LTI Advantage services
    pub token_url: String,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub updated: DateTime<Utc>,
}

/// Fields required to create an [`LtiRegistration`]
#[derive(Debug, Clone)]
pub struct NewLtiRegistration {
    /// Platform issuer
    pub issuer: String,
    /// Client id
    pub client_id: String,
    /// OIDC authorization endpoint
    pub auth_login_url: String,
    /// JWKS URL
    pub key_set_url: String,
    /// Token endpoint
    pub token_url: String,
}

/// One install of the tool in one LMS (the tenant)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationInstance {
    /// Numeric primary key
    pub id: i64,
    /// LTI 1.1 consumer key
    pub consumer_key: Option<String>,
    /// LTI 1.1 shared secret
    #[serde(skip_serializing)]
    pub shared_secret: Option<String>,
    /// LTI 1.3 registration
    pub lti_registration_id: Option<i64>,
    /// LTI 1.3 deployment id within the registration
    pub deployment_id: Option<String>,
    /// GUID of the LMS tenant, recorded on first launch and immutable afterwards
    pub tool_consumer_instance_guid: Option<String>,
    /// LMS base URL
    pub lms_url: Option<String>,
    /// Owning organization
    pub organization_id: Option<i64>,
    /// Nested JSON settings (secret values are AES-CFB ciphertext)
    pub settings: Value,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last modification time
    pub updated: DateTime<Utc>,
    /// Time of the most recent successful launch
    pub last_launched: Option<DateTime<Utc>>,
}

impl ApplicationInstance {
    /// Whether this tenant accepts LTI 1.3 launches
    #[must_use]
    pub const fn is_lti13(&self) -> bool {
        self.lti_registration_id.is_some() && self.deployment_id.is_some()
    }

    /// Whether this tenant accepts LTI 1.1 launches
    #[must_use]
    pub const fn is_lti11(&self) -> bool {
        self.consumer_key.is_some() && self.shared_secret.is_some()
    }
}

/// Fields required to create an [`ApplicationInstance`]
#[derive(Debug, Clone, Default)]
pub struct NewApplicationInstance {
    /// LTI 1.1 consumer key
    pub consumer_key: Option<String>,
    /// LTI 1.1 shared secret
    pub shared_secret: Option<String>,
    /// LTI 1.3 registration
    pub lti_registration_id: Option<i64>,
    /// LTI 1.3 deployment id
    pub deployment_id: Option<String>,
    /// LMS base URL
    pub lms_url: Option<String>,
    /// Owning organization
    pub organization_id: Option<i64>,
    /// Initial settings document
    pub settings: Value,
}

impl NewApplicationInstance {
    /// Check that at least one complete credential pair is present
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when neither `(consumer_key, shared_secret)` nor
    /// `(lti_registration_id, deployment_id)` is complete, or when a pair is
    /// only half filled.
    pub fn validate(&self) -> AppResult<()> {
        let lti11 = (self.consumer_key.is_some(), self.shared_secret.is_some());
        let lti13 = (
            self.lti_registration_id.is_some(),
            self.deployment_id.is_some(),
        );

        if lti11.0 != lti11.1 {
            return Err(AppError::invalid_input(
                "consumer_key and shared_secret must be set together",
            ));
        }
        if lti13.0 != lti13.1 {
            return Err(AppError::invalid_input(
                "lti_registration_id and deployment_id must be set together",
            ));
        }
        if !lti11.0 && !lti13.0 {
            return Err(AppError::invalid_input(
                "an application instance needs LTI 1.1 or LTI 1.3 credentials",
            ));
        }
        Ok(())
    }
}
