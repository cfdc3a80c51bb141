// ABOUTME: Process-local cache of LTI platform JSON Web Key Sets keyed by key_set_url
// ABOUTME: Positive TTL, short negative TTL after a failed fetch, and bounded stale serving during outages
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # JWKS cache
//!
//! A key set is refetched only once its positive TTL has elapsed. When a
//! fetch fails, the URL is not retried until the negative TTL has elapsed;
//! meanwhile the last good key set is served for up to `stale_grace_secs`
//! beyond its TTL. A `kid` missing from a fresh key set does not trigger a
//! refetch.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::environment::JwksCacheConfig;
use crate::errors::{AppError, AppResult, Lti13ErrorKind};

#[derive(Clone, Default)]
struct CacheEntry {
    keys: Option<Arc<JwkSet>>,
    fetched_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

/// Cache of platform key sets
pub struct JwksCache {
    http: reqwest::Client,
    clock: SharedClock,
    config: JwksCacheConfig,
    entries: DashMap<String, CacheEntry>,
    fetching: DashMap<String, Arc<Mutex<()>>>,
}

impl JwksCache {
    /// Create an empty cache fetching with `http`
    #[must_use]
    pub fn new(http: reqwest::Client, clock: SharedClock, config: JwksCacheConfig) -> Self {
        Self {
            http,
            clock,
            config,
            entries: DashMap::new(),
            fetching: DashMap::new(),
        }
    }

    /// Key set published at `url`
    ///
    /// # Errors
    ///
    /// Returns an `Lti13` error of kind `Jwks` when no usable key set is
    /// cached and the fetch fails.
    pub async fn get(&self, url: &str) -> AppResult<Arc<JwkSet>> {
        if let Some(keys) = self.fresh(url) {
            return Ok(keys);
        }

        // One fetch per URL at a time; waiters reuse its result
        let slot = Arc::clone(self.fetching.entry(url.to_owned()).or_default().value());
        let _fetching = slot.lock().await;
        if let Some(keys) = self.fresh(url) {
            return Ok(keys);
        }

        let now = self.clock.now();
        let entry = self.entry(url);

        let backing_off = entry.failed_at.is_some_and(|failed_at| {
            now - failed_at < Duration::seconds(self.config.negative_ttl_secs)
        });
        if backing_off {
            return self.stale_or_error(&entry, now, url);
        }

        match self.fetch(url).await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                debug!(url, keys = keys.keys.len(), "Fetched platform JWKS");
                self.entries.insert(
                    url.to_owned(),
                    CacheEntry {
                        keys: Some(Arc::clone(&keys)),
                        fetched_at: Some(now),
                        failed_at: None,
                    },
                );
                Ok(keys)
            }
            Err(error) => {
                warn!(url, error = %error, "Platform JWKS fetch failed");
                let failed = CacheEntry {
                    failed_at: Some(now),
                    ..entry
                };
                self.entries.insert(url.to_owned(), failed.clone());
                self.stale_or_error(&failed, now, url)
            }
        }
    }

    fn entry(&self, url: &str) -> CacheEntry {
        self.entries
            .get(url)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn fresh(&self, url: &str) -> Option<Arc<JwkSet>> {
        let entry = self.entry(url);
        let fetched_at = entry.fetched_at?;
        let keys = entry.keys?;
        (self.clock.now() - fetched_at < Duration::seconds(self.config.ttl_secs)).then_some(keys)
    }

    fn stale_or_error(
        &self,
        entry: &CacheEntry,
        now: DateTime<Utc>,
        url: &str,
    ) -> AppResult<Arc<JwkSet>> {
        let limit = Duration::seconds(self.config.ttl_secs + self.config.stale_grace_secs);
        match (&entry.keys, entry.fetched_at) {
            (Some(keys), Some(fetched_at)) if now - fetched_at < limit => {
                debug!(url, "Serving stale platform JWKS");
                Ok(Arc::clone(keys))
            }
            _ => Err(AppError::lti13(
                Lti13ErrorKind::Jwks,
                format!("No usable JWKS for {url}"),
            )),
        }
    }

    async fn fetch(&self, url: &str) -> Result<JwkSet, reqwest::Error> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await
    }

    /// Drop every cached key set
    pub fn clear(&self) {
        self.entries.clear();
        self.fetching.clear();
    }
}
