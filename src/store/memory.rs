use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{DurableRecord, DurableStore};
use crate::error::StoreResult;
use crate::pattern::GlobPattern;

/// Process-local durable store.
///
/// Used when no persistent path is configured and as the record map behind
/// [`super::FileStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DurableRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = DurableRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.cache_key.clone(), record))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// All records, expired ones included, ordered by key.
    pub fn snapshot(&self) -> Vec<DurableRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
        records
    }

    pub(crate) fn get_live(&self, key: &str) -> Option<DurableRecord> {
        let records = self.records.read();
        records
            .get(key)
            .filter(|record| !record.is_expired())
            .cloned()
    }

    /// Insert or replace, handing back the record that was replaced.
    pub(crate) fn upsert(&self, record: DurableRecord) -> Option<DurableRecord> {
        self.records.write().insert(record.cache_key.clone(), record)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<DurableRecord> {
        self.records.write().remove(key)
    }

    pub(crate) fn restore(&self, records: impl IntoIterator<Item = DurableRecord>) {
        let mut map = self.records.write();
        for record in records {
            map.insert(record.cache_key.clone(), record);
        }
    }

    pub(crate) fn record_hit(&self, key: &str) -> bool {
        match self.records.write().get_mut(key) {
            Some(record) => {
                record.record_hit();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_matching(&self, pattern: &str) -> u64 {
        self.take_matching(pattern).len() as u64
    }

    /// Remove and return every record whose key matches `pattern`.
    pub(crate) fn take_matching(&self, pattern: &str) -> Vec<DurableRecord> {
        let pattern = GlobPattern::new(pattern);
        let mut records = self.records.write();
        let keys: Vec<String> = records
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.iter().filter_map(|key| records.remove(key)).collect()
    }

    pub(crate) fn remove_expired(&self) -> u64 {
        let now = Utc::now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        (before - records.len()) as u64
    }

    pub(crate) fn count(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<DurableRecord>> {
        Ok(self.get_live(key))
    }

    async fn put(&self, record: DurableRecord) -> StoreResult<()> {
        self.upsert(record);
        Ok(())
    }

    async fn touch(&self, key: &str) -> StoreResult<()> {
        self.record_hit(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64> {
        Ok(self.remove_matching(pattern))
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        Ok(self.remove_expired())
    }

    async fn record_count(&self) -> StoreResult<usize> {
        Ok(self.count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn record(key: &str, ttl_secs: u64) -> DurableRecord {
        DurableRecord::new(key, json!({ "k": key }), "ads", "client42", Duration::from_secs(ttl_secs))
    }

    fn expired(key: &str) -> DurableRecord {
        let mut r = record(key, 60);
        r.expires_at = Utc::now() - chrono::Duration::seconds(5);
        r
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put(record("ads:client42", 60)).await.unwrap();

        let found = store.get("ads:client42").await.unwrap().unwrap();
        assert_eq!(found.payload, json!({ "k": "ads:client42" }));
        assert_eq!(found.ttl_seconds, 60);
        assert!(store.get("ads:client07").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_reads_as_absent_but_stays() {
        let store = MemoryStore::new();
        store.put(expired("ads:old")).await.unwrap();

        assert!(store.get("ads:old").await.unwrap().is_none());
        assert_eq!(store.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_record_per_key() {
        let store = MemoryStore::new();
        store.put(record("ads:client42", 60)).await.unwrap();
        let mut newer = record("ads:client42", 120);
        newer.payload = json!("v2");
        store.put(newer).await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 1);
        let found = store.get("ads:client42").await.unwrap().unwrap();
        assert_eq!(found.payload, json!("v2"));
        assert_eq!(found.ttl_seconds, 120);
    }

    #[tokio::test]
    async fn test_touch_counts_hits() {
        let store = MemoryStore::new();
        store.put(record("ga4:p1", 60)).await.unwrap();
        store.touch("ga4:p1").await.unwrap();
        store.touch("ga4:p1").await.unwrap();
        store.touch("ga4:missing").await.unwrap();

        let found = store.get("ga4:p1").await.unwrap().unwrap();
        assert_eq!(found.hit_count, 2);
        assert!(found.last_accessed_at >= found.created_at);
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let store = MemoryStore::new();
        store.put(record("ads-client42-campaigns", 60)).await.unwrap();
        store.put(record("ads-client42-keywords", 60)).await.unwrap();
        store.put(record("ads-client07-campaigns", 60)).await.unwrap();

        let removed = store.delete_by_pattern("ads-client42-*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("ads-client07-campaigns").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        store.put(expired("a")).await.unwrap();
        store.put(expired("b")).await.unwrap();
        store.put(record("c", 60)).await.unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert_eq!(store.record_count().await.unwrap(), 1);
        assert_eq!(store.snapshot()[0].cache_key, "c");
    }
}
