// ABOUTME: Organization provisioning for lti-cli
// ABOUTME: Generates a public id under the configured authority and links an optional parent
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use lti_launch::context::ServerResources;
use lti_launch::errors::{AppError, AppResult};
use lti_launch::models::NewOrganization;
use lti_launch::tenants::generate_organization_public_id;

pub async fn create(
    resources: &ServerResources,
    name: String,
    parent: Option<&str>,
    enabled: bool,
) -> AppResult<()> {
    let parent_id = match parent {
        Some(public_id) => Some(
            resources
                .tenants
                .organization_by_public_id(public_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Organization {public_id}")))?
                .id,
        ),
        None => None,
    };

    let organization = resources
        .tenants
        .create_organization(&NewOrganization {
            public_id: generate_organization_public_id(&resources.config.h.authority),
            name: Some(name),
            parent_id,
            enabled,
        })
        .await?;

    println!("Created organization {}", organization.public_id);
    if !organization.enabled {
        println!("  (disabled: launches will be refused)");
    }
    Ok(())
}
