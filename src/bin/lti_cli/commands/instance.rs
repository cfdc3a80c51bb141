// ABOUTME: Application instance provisioning and inspection for lti-cli
// ABOUTME: Create with LTI 1.1 credentials or a 1.3 deployment, show as JSON, store encrypted settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde_json::json;

use lti_launch::context::ServerResources;
use lti_launch::errors::{AppError, AppResult};
use lti_launch::models::NewApplicationInstance;
use lti_launch::tenants::generate_lti11_credentials;

/// Create a tenant
///
/// Without a deployment the tenant gets a fresh LTI 1.1 key pair, printed once.
pub async fn create(
    resources: &ServerResources,
    lms_url: Option<String>,
    organization: Option<&str>,
    deployment: Option<(i64, String)>,
) -> AppResult<()> {
    let organization_id = match organization {
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

    let mut new_instance = NewApplicationInstance {
        lms_url,
        organization_id,
        settings: json!({}),
        ..NewApplicationInstance::default()
    };
    let mut generated_secret = None;
    if let Some((registration_id, deployment_id)) = deployment {
        resources
            .tenants
            .registration_by_id(registration_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("LTI registration {registration_id}")))?;
        new_instance.lti_registration_id = Some(registration_id);
        new_instance.deployment_id = Some(deployment_id);
    } else {
        let (consumer_key, shared_secret) = generate_lti11_credentials();
        new_instance.consumer_key = Some(consumer_key);
        new_instance.shared_secret = Some(shared_secret.clone());
        generated_secret = Some(shared_secret);
    }

    let instance = resources
        .tenants
        .create_application_instance(&new_instance)
        .await?;

    println!("Created application instance {}", instance.id);
    if let (Some(key), Some(secret)) = (&instance.consumer_key, generated_secret) {
        println!("  consumer key:  {key}");
        println!("  shared secret: {secret}");
    }
    if let Some(deployment_id) = &instance.deployment_id {
        println!("  deployment id: {deployment_id}");
    }
    Ok(())
}

pub async fn show(
    resources: &ServerResources,
    id: Option<i64>,
    consumer_key: Option<&str>,
) -> AppResult<()> {
    let instance = match (id, consumer_key) {
        (Some(id), _) => resources.tenants.by_id(id).await?,
        (None, Some(key)) => resources.tenants.by_consumer_key(key).await?,
        (None, None) => {
            return Err(AppError::invalid_input("Pass --id or --consumer-key"));
        }
    }
    .ok_or_else(|| AppError::not_found("Application instance"))?;

    let rendered = serde_json::to_string_pretty(&instance)
        .map_err(|e| AppError::internal(format!("Failed to render instance: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// Encrypt `value` into `group.key` of the tenant settings
pub async fn set_secret(
    resources: &ServerResources,
    id: i64,
    group: &str,
    key: &str,
    value: &str,
) -> AppResult<()> {
    let instance = resources.tenants.require(id).await?;
    let mut settings = resources.tenants.settings(&instance);
    settings.set_secret(resources.tenants.cipher(), group, key, value)?;
    resources.tenants.save_settings(instance.id, &mut settings).await?;
    println!("Stored {group}.{key} for application instance {id}");
    Ok(())
}
