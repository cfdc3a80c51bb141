// ABOUTME: LTI 1.3 platform registration for lti-cli
// ABOUTME: Records issuer, client id and the platform endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use lti_launch::context::ServerResources;
use lti_launch::errors::AppResult;
use lti_launch::models::NewLtiRegistration;

pub async fn create(
    resources: &ServerResources,
    issuer: String,
    client_id: String,
    auth_login_url: String,
    key_set_url: String,
    token_url: String,
) -> AppResult<()> {
    let registration = resources
        .tenants
        .create_registration(&NewLtiRegistration {
            issuer,
            client_id,
            auth_login_url,
            key_set_url,
            token_url,
        })
        .await?;

    println!(
        "Created registration {} for {} (client id {})",
        registration.id, registration.issuer, registration.client_id
    );
    Ok(())
}
