//! TTL response cache keyed by request fingerprint.
//!
//! Expiry is checked at read time; stale entries are removed lazily on
//! lookup, on insert when the cache is full, and by the periodic sweep.
//! Concurrent misses for the same fingerprint are not coalesced: each runs
//! the pipeline and the last successful `put` wins.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pipeline::RequestFingerprint;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::maintenance::MaintenanceHandle;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Hit(V),
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn expires_at(&self) -> Instant {
        self.inserted_at + self.ttl
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at()
    }
}

/// Process-wide store of generated responses.
#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: DashMap<RequestFingerprint, CacheEntry<V>>,
    config: CacheConfig,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(if config.enabled { config.capacity } else { 0 }),
            config,
        }
    }

    /// TTL applied by callers that do not choose their own.
    pub fn default_ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Returns the stored value if it is still live at `now`.
    pub fn get(&self, key: &RequestFingerprint, now: Instant) -> CacheLookup<V> {
        if !self.config.enabled {
            return CacheLookup::Miss;
        }

        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                trace!(fingerprint = key.short(), "Cache hit");
                return CacheLookup::Hit(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            // Another writer may have refreshed the entry since the read.
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
            trace!(fingerprint = key.short(), "Cache entry expired");
        }
        CacheLookup::Miss
    }

    /// Stores `value` under `key` until `now + ttl`, replacing any previous
    /// entry.
    pub fn put(&self, key: RequestFingerprint, value: V, ttl: Duration, now: Instant) {
        if !self.config.enabled {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.config.capacity {
                let soonest = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.value().expires_at())
                    .map(|entry| entry.key().clone());
                if let Some(victim) = soonest {
                    self.entries.remove(&victim);
                    debug!(fingerprint = victim.short(), "Evicted entry to make room");
                }
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }

    /// Removes every entry expired at `now`. Returns the number removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Starts a periodic expiry sweep.
    pub fn spawn_maintenance(self: &Arc<Self>, period: Duration) -> MaintenanceHandle {
        let cache = Arc::clone(self);
        MaintenanceHandle::spawn("response_cache", period, move || {
            cache.purge_expired(Instant::now());
        })
    }
}
