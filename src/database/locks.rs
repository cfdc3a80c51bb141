// ABOUTME: Process-local advisory lock registry used by the SQLite backend
// ABOUTME: One async mutex per (lock type, key), dropped again once nobody holds or awaits it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database_plugins::AdvisoryLock;
use crate::models::LockType;

type SlotKey = (i32, i64);
type Slots = DashMap<SlotKey, Arc<Mutex<()>>>;

/// SQLite has no advisory locks; a single-process deployment gets the same
/// mutual exclusion from an in-memory table of mutexes.
#[derive(Clone, Default)]
pub struct LockRegistry {
    slots: Arc<Slots>,
}

/// Guard of one registry slot
///
/// Dropping it releases the mutex and removes the slot when no other caller
/// holds a reference to it.
pub struct LocalLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Slots>,
    key: SlotKey,
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the map's own reference is the only one left
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl LockRegistry {
    fn slot(&self, key: SlotKey) -> Arc<Mutex<()>> {
        Arc::clone(self.slots.entry(key).or_default().value())
    }

    fn guard(&self, key: SlotKey, guard: OwnedMutexGuard<()>) -> AdvisoryLock {
        AdvisoryLock::local(LocalLockGuard {
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
            key,
        })
    }

    /// Take the lock if nobody holds it
    #[must_use]
    pub fn try_lock(&self, lock_type: LockType, key: i64) -> Option<AdvisoryLock> {
        let key = (lock_type.as_i32(), key);
        let guard = self.slot(key).try_lock_owned().ok()?;
        Some(self.guard(key, guard))
    }

    /// Wait for the lock
    pub async fn lock(&self, lock_type: LockType, key: i64) -> AdvisoryLock {
        let key = (lock_type.as_i32(), key);
        let guard = self.slot(key).lock_owned().await;
        self.guard(key, guard)
    }

    /// Number of keys currently locked or awaited
    #[must_use]
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }
}
