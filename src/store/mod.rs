//! Durable cache tier.
//!
//! The durable tier survives process restarts and is shared between
//! processes. It is reached only through [`DurableStore`], so the backing
//! technology can be swapped without touching the cache-or-fetch path.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::MAX_TTL;
use crate::error::StoreResult;

/// One cached answer in the durable tier. Unique per `cache_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub cache_key: String,
    pub payload: Value,
    pub source: String,
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl DurableRecord {
    /// Fresh record created now and valid for `ttl`, rounded up to whole
    /// seconds and capped at one year.
    pub fn new(
        cache_key: impl Into<String>,
        payload: Value,
        source: impl Into<String>,
        subject_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl_seconds = whole_seconds(ttl);
        Self {
            cache_key: cache_key.into(),
            payload,
            source: source.into(),
            subject_id: subject_id.into(),
            expires_at: i64::try_from(ttl_seconds)
                .ok()
                .and_then(chrono::TimeDelta::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ttl_seconds,
            hit_count: 0,
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let left = self.expires_at.signed_duration_since(Utc::now());
        left.to_std().ok().filter(|d| !d.is_zero())
    }

    pub(crate) fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_accessed_at = Utc::now();
    }
}

fn whole_seconds(ttl: Duration) -> u64 {
    let ttl = ttl.min(MAX_TTL);
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Adapter over the persistent key-value table.
///
/// Implementations must be safe to call concurrently. Concurrent `put`s for
/// the same key resolve as last-write-wins.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Live record for `key`. Expired records read as absent but are left in
    /// place for [`DurableStore::sweep_expired`].
    async fn get(&self, key: &str) -> StoreResult<Option<DurableRecord>>;

    /// Insert or replace the record keyed by `record.cache_key`.
    async fn put(&self, record: DurableRecord) -> StoreResult<()>;

    /// Bump `hit_count` and `last_accessed_at`. Missing keys are ignored.
    async fn touch(&self, key: &str) -> StoreResult<()>;

    /// Delete every record whose key matches the `*`-glob `pattern`.
    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64>;

    /// Delete every record whose `expires_at` has passed.
    async fn sweep_expired(&self) -> StoreResult<u64>;

    /// Write out state held back from earlier calls, such as hit counters.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Number of stored records, expired ones included.
    async fn record_count(&self) -> StoreResult<usize>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_huge_ttl_is_capped() {
        let record = DurableRecord::new("ads:c1", json!(1), "ads", "c1", Duration::from_secs(10_u64.pow(13)));
        assert_eq!(record.ttl_seconds, MAX_TTL.as_secs());
        assert!(!record.is_expired());
        assert!(record.remaining_ttl().unwrap() <= MAX_TTL);

        let record = DurableRecord::new("ads:c1", json!(1), "ads", "c1", Duration::MAX);
        assert_eq!(record.ttl_seconds, MAX_TTL.as_secs());
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let record = DurableRecord::new("ads:c1", json!(1), "ads", "c1", Duration::from_millis(500));
        assert_eq!(record.ttl_seconds, 1);
        assert!(!record.is_expired());

        let record = DurableRecord::new("ads:c1", json!(1), "ads", "c1", Duration::from_millis(1500));
        assert_eq!(record.ttl_seconds, 2);
    }

    #[test]
    fn test_expiry_follows_ttl() {
        let record = DurableRecord::new("ads:c1", json!(1), "ads", "c1", Duration::from_secs(60));
        assert_eq!(record.expires_at - record.created_at, chrono::TimeDelta::seconds(60));
        assert!(!record.is_expired_at(record.created_at + chrono::TimeDelta::seconds(59)));
        assert!(record.is_expired_at(record.created_at + chrono::TimeDelta::seconds(60)));
    }
}
