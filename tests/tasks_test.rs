// ABOUTME: Integration tests for background maintenance and logging setup
// ABOUTME: Nonce purge, scheduler shutdown and LOG_FORMAT parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::time::timeout;

use lti_launch::clock::Clock;
use lti_launch::database_plugins::DatabaseProvider;
use lti_launch::logging::LogFormat;
use lti_launch::tasks::{purge_nonces, BackgroundTasks};

use common::{test_config_with, test_resources, test_resources_with};

#[tokio::test]
async fn test_purge_removes_only_expired_nonces() {
    let (resources, clock) = test_resources().await;
    let now = clock.now();
    let database = &resources.database;
    assert!(database
        .record_nonce("oauth1:1", "short", now + Duration::seconds(60), now)
        .await
        .unwrap());
    assert!(database
        .record_nonce("oauth1:1", "long", now + Duration::hours(1), now)
        .await
        .unwrap());

    clock.advance(Duration::minutes(5));
    assert_eq!(purge_nonces(&resources).await.unwrap(), 1);
    assert_eq!(purge_nonces(&resources).await.unwrap(), 0);

    // the surviving nonce still blocks a replay
    let now = clock.now();
    assert!(!database
        .record_nonce("oauth1:1", "long", now + Duration::hours(1), now)
        .await
        .unwrap());
    assert!(database
        .record_nonce("oauth1:1", "short", now + Duration::hours(1), now)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let (resources, _) = test_resources_with(test_config_with(&[("RSA_KEY_BITS", "1024")])).await;

    let tasks = BackgroundTasks::spawn(&resources);

    timeout(StdDuration::from_secs(30), tasks.shutdown())
        .await
        .unwrap();
}

#[test]
fn test_log_format_from_env_value() {
    assert_eq!(LogFormat::from_str_or_default("json"), LogFormat::Json);
    assert_eq!(LogFormat::from_str_or_default("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::from_str_or_default("pretty"), LogFormat::Text);
    assert_eq!(LogFormat::from_str_or_default(""), LogFormat::Text);
}
