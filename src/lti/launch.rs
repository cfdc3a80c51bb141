// ABOUTME: Launch resolution from verified parameters to a canonical LaunchContext
// ABOUTME: Required fields, organization gate, first-seen GUID claim, product family, roles and launch bookkeeping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::clock::SharedClock;
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::identity::display_name;
use crate::models::{ApplicationInstance, LtiVersion};
use crate::tenants::TenantRegistry;

use super::params::LaunchParams;
use super::roles::{is_instructor, parse_roles, Role};

/// LMS product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductFamily {
    /// Instructure Canvas
    Canvas,
    /// Blackboard Learn
    BlackboardLearn,
    /// D2L Brightspace
    D2l,
    /// Moodle
    Moodle,
    /// Sakai
    Sakai,
    /// Schoology
    Schoology,
    /// Any other LMS
    Unknown,
}

impl ProductFamily {
    /// Family for a `tool_consumer_info_product_family_code` or `lms.product` value
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        match code.as_str() {
            "canvas" => Self::Canvas,
            "desire2learn" | "d2l" | "brightspace" => Self::D2l,
            "moodle" => Self::Moodle,
            "sakai" => Self::Sakai,
            "schoology" => Self::Schoology,
            other if other.starts_with("blackboard") => Self::BlackboardLearn,
            _ => Self::Unknown,
        }
    }

    /// Family of a launch
    ///
    /// The launch's product family code wins; then the API-supplied product;
    /// then the presence of `custom_canvas_course_id`.
    #[must_use]
    pub fn detect(params: &LaunchParams, api_product: Option<&str>) -> Self {
        if let Some(code) = params.get("tool_consumer_info_product_family_code") {
            return Self::from_code(code);
        }
        if let Some(product) = api_product.filter(|product| !product.trim().is_empty()) {
            return Self::from_code(product);
        }
        if params.get("custom_canvas_course_id").is_some() {
            return Self::Canvas;
        }
        Self::Unknown
    }
}

/// The launching user
#[derive(Debug, Clone, Serialize)]
pub struct LtiUser {
    /// LMS user id (`user_id` / `sub`)
    pub user_id: String,
    /// Parsed roles
    pub roles: Vec<Role>,
    /// Roles as sent by the LMS
    pub raw_roles: String,
    /// Whether any role grants instructor rights
    pub is_instructor: bool,
    /// Email address, when the LMS shares it
    pub email: Option<String>,
    /// Display name
    pub display_name: String,
}

/// Canonical description of a verified launch
#[derive(Debug, Clone, Serialize)]
pub struct LaunchContext {
    /// Tenant, with its GUID as recorded after this launch
    pub instance: ApplicationInstance,
    /// Protocol of the launch
    pub lti_version: LtiVersion,
    /// The launching user
    pub user: LtiUser,
    /// LMS context (course) id
    pub context_id: String,
    /// Course title
    pub context_title: Option<String>,
    /// Assignment link id
    pub resource_link_id: Option<String>,
    /// LMS product
    pub product_family: ProductFamily,
    /// Raw validated parameters
    pub params: LaunchParams,
}

impl LaunchContext {
    /// LMS tenant GUID, preferring the recorded one
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.instance
            .tool_consumer_instance_guid
            .as_deref()
            .or_else(|| self.params.get("tool_consumer_instance_guid"))
    }

    /// Where the LMS asked to be sent back to, if anywhere
    #[must_use]
    pub fn return_url(&self) -> Option<&str> {
        self.params.get("launch_presentation_return_url")
    }
}

fn lms_url(params: &LaunchParams) -> Option<String> {
    params
        .get("launch_presentation_return_url")
        .or_else(|| params.get("tool_consumer_instance_url"))
        .and_then(|raw| Url::parse(raw).ok())
        .map(|url| url.origin().ascii_serialization())
        .filter(|origin| origin != "null")
}

/// Turns verified launch parameters into a [`LaunchContext`]
#[derive(Clone)]
pub struct LaunchResolver {
    tenants: TenantRegistry,
    db: Arc<Database>,
    clock: SharedClock,
}

impl LaunchResolver {
    /// Create a resolver
    #[must_use]
    pub const fn new(tenants: TenantRegistry, db: Arc<Database>, clock: SharedClock) -> Self {
        Self { tenants, db, clock }
    }

    /// Resolve a launch verified for `instance`
    ///
    /// # Errors
    ///
    /// - `LaunchForbidden` when `user_id` is missing or the tenant's
    ///   organization (or an ancestor) is disabled
    /// - `MissingLaunchParam` when `context_id`, `lti_version` or
    ///   `lti_message_type` is missing
    /// - `TenantMismatch` when the launch GUID differs from the recorded one
    pub async fn resolve(
        &self,
        instance: ApplicationInstance,
        lti_version: LtiVersion,
        params: LaunchParams,
        api_product: Option<&str>,
    ) -> AppResult<LaunchContext> {
        let user_id = params
            .get("user_id")
            .ok_or_else(|| AppError::launch_forbidden("Launch has no user_id"))?
            .to_owned();
        let context_id = params
            .get("context_id")
            .ok_or_else(|| AppError::missing_launch_param("context_id"))?
            .to_owned();
        for field in ["lti_version", "lti_message_type"] {
            if params.get(field).is_none() {
                return Err(AppError::missing_launch_param(field));
            }
        }

        if let Some(organization_id) = instance.organization_id {
            if !self.tenants.organization_enabled(organization_id).await? {
                return Err(AppError::launch_forbidden(format!(
                    "Organization {organization_id} is disabled"
                )));
            }
        }

        let instance = self.claim_guid(instance, &params).await?;

        let raw_roles = params.get("roles").unwrap_or_default().to_owned();
        let roles = parse_roles(&raw_roles);
        let user = LtiUser {
            is_instructor: is_instructor(&roles),
            display_name: display_name(
                params.get("lis_person_name_full"),
                params.get("lis_person_name_given"),
                params.get("lis_person_name_family"),
            ),
            email: params
                .get("lis_person_contact_email_primary")
                .map(str::to_owned),
            user_id,
            roles,
            raw_roles,
        };

        self.db
            .record_application_instance_launch(
                instance.id,
                lms_url(&params).as_deref(),
                self.clock.now(),
            )
            .await?;

        let context = LaunchContext {
            product_family: ProductFamily::detect(&params, api_product),
            context_title: params.get("context_title").map(str::to_owned),
            resource_link_id: params.get("resource_link_id").map(str::to_owned),
            instance,
            lti_version,
            user,
            context_id,
            params,
        };
        info!(
            application_instance_id = context.instance.id,
            lti_version = %context.lti_version,
            product_family = ?context.product_family,
            instructor = context.user.is_instructor,
            "Launch resolved"
        );
        Ok(context)
    }

    /// Record the launch GUID on first sight; reject a different one afterwards
    async fn claim_guid(
        &self,
        mut instance: ApplicationInstance,
        params: &LaunchParams,
    ) -> AppResult<ApplicationInstance> {
        let Some(guid) = params.get("tool_consumer_instance_guid") else {
            return Ok(instance);
        };

        if instance.tool_consumer_instance_guid.is_none() {
            if self
                .db
                .claim_tool_consumer_instance_guid(instance.id, guid, self.clock.now())
                .await?
            {
                info!(application_instance_id = instance.id, "Recorded tenant GUID");
                instance.tool_consumer_instance_guid = Some(guid.to_owned());
                return Ok(instance);
            }
            instance = self.tenants.require(instance.id).await?;
        }

        match instance.tool_consumer_instance_guid.as_deref() {
            Some(recorded) if recorded != guid => {
                warn!(
                    application_instance_id = instance.id,
                    "Launch GUID differs from the recorded tenant GUID"
                );
                Err(AppError::tenant_mismatch(
                    "Launch comes from a different LMS than the one this tenant is bound to",
                ))
            }
            _ => Ok(instance),
        }
    }
}
