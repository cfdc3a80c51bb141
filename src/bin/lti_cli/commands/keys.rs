// ABOUTME: Signing keyset maintenance for lti-cli
// ABOUTME: Manual rotation pass and a listing of stored keys
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use lti_launch::context::ServerResources;
use lti_launch::database_plugins::DatabaseProvider;
use lti_launch::errors::AppResult;
use lti_launch::tasks;

pub async fn rotate(resources: &ServerResources) -> AppResult<()> {
    let report = tasks::rotate_keys(resources).await?;
    println!(
        "Rotation: {} created, {} expired, {} deleted",
        report.created, report.expired, report.deleted
    );
    Ok(())
}

pub async fn list(resources: &ServerResources) -> AppResult<()> {
    let keys = resources.database.list_rsa_keys().await?;
    if keys.is_empty() {
        println!("No signing keys");
        return Ok(());
    }
    for key in keys {
        let status = if key.expired { "expired" } else { "active" };
        println!("{}  {status:<8} {}", key.kid, key.created.to_rfc3339());
    }
    Ok(())
}
