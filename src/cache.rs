//! Fast in-process cache tier.
//!
//! A bounded map with a per-entry absolute expiry. It is an optimisation
//! only: dropping every entry at any moment changes latency, never results.
//!
//! Entries are read with `peek`, so reads do not refresh an entry's position
//! and eviction under capacity pressure removes the earliest inserted entry.
//! parking_lot locks are used for their lower overhead and lack of poisoning.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru_time_cache::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::pattern::GlobPattern;

pub const DEFAULT_CAPACITY: usize = 500;

/// Fraction of an entry's lifetime after which it is due for a refresh.
const WARM_AFTER: f64 = 0.8;

pub(crate) const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn ttl(&self) -> Duration {
        self.expires_at.duration_since(self.created_at)
    }

    fn is_due_for_refresh_at(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.created_at);
        elapsed.as_secs_f64() > self.ttl().as_secs_f64() * WARM_AFTER
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FastCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub capacity: usize,
    pub evictions: u64,
    pub warming: usize,
}

pub struct FastCache {
    store: RwLock<LruCache<String, CacheEntry>>,
    capacity: usize,
    warming: Arc<Mutex<HashSet<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for FastCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FastCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store: RwLock::new(LruCache::with_capacity(capacity)),
            capacity,
            warming: Arc::new(Mutex::new(HashSet::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.live_entry(key).map(|entry| entry.value);
        self.record_lookup(value.is_some());
        value
    }

    pub fn has(&self, key: &str) -> bool {
        let found = self.live_entry(key).is_some();
        self.record_lookup(found);
        found
    }

    /// Insert or replace `key`. A zero TTL stores nothing and drops any
    /// existing entry for the key.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        let mut store = self.store.write();

        if ttl.is_zero() {
            store.remove(&key);
            return;
        }

        let created_at = Instant::now();
        let expires_at = created_at
            .checked_add(ttl)
            .unwrap_or(created_at + MAX_TTL);

        if store.peek(&key).is_none() && store.len() >= self.capacity {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(capacity = self.capacity, "Fast cache full, evicting oldest entry");
        }

        store.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at,
                expires_at,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.write().remove(key).is_some()
    }

    /// Time left before `key` expires, `None` if absent or expired.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let store = self.store.read();
        store
            .peek(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.expires_at.duration_since(now))
    }

    /// Remove every entry whose key matches the `*`-glob `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let pattern = GlobPattern::new(pattern);
        let mut store = self.store.write();
        let doomed: Vec<String> = store
            .peek_iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            store.remove(key);
        }
        doomed.len()
    }

    /// Drop every expired entry. Reads already expire lazily; this only
    /// reclaims space held by entries nobody asks for.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.write();
        let expired: Vec<String> = store
            .peek_iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.remove(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.store.write().clear();
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `key` has no live entry or has used up more than 80% of its
    /// lifetime, and no refresh is already running for it.
    pub fn needs_warming(&self, key: &str) -> bool {
        if self.warming.lock().contains(key) {
            return false;
        }
        let now = Instant::now();
        let store = self.store.read();
        match store.peek(key) {
            None => true,
            Some(entry) => entry.is_expired_at(now) || entry.is_due_for_refresh_at(now),
        }
    }

    /// Mark `key` as refreshing. Returns `None` if a refresh already holds
    /// the mark. The mark is cleared when the guard is dropped.
    pub fn begin_warming(&self, key: &str) -> Option<WarmingGuard> {
        let mut warming = self.warming.lock();
        if !warming.insert(key.to_string()) {
            return None;
        }
        Some(WarmingGuard {
            key: key.to_string(),
            warming: Arc::clone(&self.warming),
        })
    }

    pub fn is_warming(&self, key: &str) -> bool {
        self.warming.lock().contains(key)
    }

    pub fn stats(&self) -> FastCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        FastCacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            entries: self.len(),
            capacity: self.capacity,
            evictions: self.evictions.load(Ordering::Relaxed),
            warming: self.warming.lock().len(),
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Live entry for `key`; an expired one is removed on the way out.
    fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let store = self.store.read();
            match store.peek(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut store = self.store.write();
        // Re-check under the write lock: a concurrent set may have replaced it.
        if store.peek(key).is_some_and(|entry| entry.is_expired_at(now)) {
            store.remove(key);
        }
        None
    }
}

/// Holds the refreshing mark for one key.
pub struct WarmingGuard {
    key: String,
    warming: Arc<Mutex<HashSet<String>>>,
}

impl WarmingGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for WarmingGuard {
    fn drop(&mut self) {
        self.warming.lock().remove(&self.key);
    }
}
