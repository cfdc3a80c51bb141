// ABOUTME: Periodic background work: signing key rotation and expired nonce purge
// ABOUTME: Tasks run on tokio intervals and stop on a shared shutdown signal
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::future::Future;
use std::time::Duration;

use chrono::Duration as AgeDuration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::constants::limits::NONCE_PURGE_INTERVAL_SECS;
use crate::context::ServerResources;
use crate::database_plugins::DatabaseProvider;
use crate::errors::AppResult;
use crate::failsafe::{with_retry, RetryPolicy};
use crate::keyset::RotationReport;

/// Run one key rotation pass with the configured policy
///
/// # Errors
///
/// Returns the last error once retries are exhausted.
pub async fn rotate_keys(resources: &ServerResources) -> AppResult<RotationReport> {
    let policy = resources.config.key_rotation;
    let report = with_retry(&RetryPolicy::default(), "key_rotation", || {
        resources.keyset.rotate(
            policy.target_keys,
            AgeDuration::hours(policy.max_age_hours),
            AgeDuration::hours(policy.max_expired_age_hours),
        )
    })
    .await?;
    info!(
        created = report.created,
        expired = report.expired,
        deleted = report.deleted,
        "Key rotation pass finished"
    );
    Ok(report)
}

/// Delete every expired nonce
///
/// # Errors
///
/// Propagates database errors.
pub async fn purge_nonces(resources: &ServerResources) -> AppResult<u64> {
    let purged = resources
        .database
        .purge_expired_nonces(resources.clock.now())
        .await?;
    debug!(purged, "Expired nonces purged");
    Ok(purged)
}

/// Handles of the spawned background tasks
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn key rotation and nonce purge
    #[must_use]
    pub fn spawn(resources: &ServerResources) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let rotation_period =
            Duration::from_secs(resources.config.key_rotation.interval_secs.max(1));
        info!(
            interval_secs = rotation_period.as_secs(),
            "Starting key rotation scheduler"
        );

        let handles = vec![
            tokio::spawn(run_every(
                rotation_period,
                receiver.clone(),
                resources.clone(),
                "key_rotation",
                |resources| async move { rotate_keys(&resources).await.map(|_| ()) },
            )),
            tokio::spawn(run_every(
                Duration::from_secs(NONCE_PURGE_INTERVAL_SECS),
                receiver,
                resources.clone(),
                "nonce_purge",
                |resources| async move { purge_nonces(&resources).await.map(|_| ()) },
            )),
        ];
        Self { shutdown, handles }
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) {
        // receivers may already be gone if a task ended on its own
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Background task ended abnormally: {e}");
            }
        }
        info!("Background tasks stopped");
    }
}

async fn run_every<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    resources: ServerResources,
    name: &'static str,
    job: F,
) where
    F: Fn(ServerResources) -> Fut + Send,
    Fut: Future<Output = AppResult<()>> + Send,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = job(resources.clone()).await {
                    error!(task = name, "Background task failed: {e}");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(task = name, "Background task stopping");
                    return;
                }
            }
        }
    }
}
