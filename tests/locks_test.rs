// ABOUTME: Integration tests for the in-process advisory lock registry used with SQLite
// ABOUTME: Mutual exclusion per key, waiters served in turn and slots dropped once idle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::time::Duration;

use tokio::time::{sleep, timeout};

use lti_launch::database::LockRegistry;
use lti_launch::models::LockType;

#[tokio::test]
async fn test_lock_excludes_per_key_and_type() {
    let locks = LockRegistry::default();

    let held = locks.try_lock(LockType::OAuth2TokenRefresh, 1).unwrap();
    assert!(locks.try_lock(LockType::OAuth2TokenRefresh, 1).is_none());
    assert!(locks.try_lock(LockType::OAuth2TokenRefresh, 2).is_some());
    assert!(locks.try_lock(LockType::JwtOAuth2TokenRefresh, 1).is_some());

    held.release().await.unwrap();
    assert!(locks.try_lock(LockType::OAuth2TokenRefresh, 1).is_some());
}

#[tokio::test]
async fn test_idle_slots_are_dropped() {
    let locks = LockRegistry::default();

    for key in 0..100 {
        let lock = locks.lock(LockType::OAuth2TokenRefresh, key).await;
        lock.release().await.unwrap();
    }
    drop(locks.try_lock(LockType::JwtOAuth2TokenRefresh, 7));

    assert_eq!(locks.active_slots(), 0);
}

#[tokio::test]
async fn test_waiter_keeps_the_slot_alive() {
    let locks = LockRegistry::default();
    let held = locks.lock(LockType::JwtOAuth2TokenRefresh, 9).await;

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move {
            let lock = locks.lock(LockType::JwtOAuth2TokenRefresh, 9).await;
            lock.release().await.unwrap();
        })
    };
    sleep(Duration::from_millis(20)).await;
    held.release().await.unwrap();
    assert!(locks.active_slots() <= 1);

    timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(locks.active_slots(), 0);
}
