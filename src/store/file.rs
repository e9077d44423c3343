use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DurableRecord, DurableStore, MemoryStore};
use crate::error::StoreResult;

/// Durable store persisted as a JSON snapshot on local disk.
///
/// Records are served from memory. Puts and deletes rewrite the snapshot
/// through a temp file and a rename, so a crash leaves either the old or the
/// new snapshot on disk, never a torn one. Hit counters stay in memory until
/// the next rewrite, sweep or [`DurableStore::flush`].
pub struct FileStore {
    path: PathBuf,
    records: MemoryStore,
    // Serialises mutate-then-write so snapshots land in mutation order.
    write_lock: Mutex<()>,
    // Memory holds hit counters the snapshot does not have yet.
    dirty: AtomicBool,
}

impl FileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<DurableRecord> = serde_json::from_slice(&bytes)?;
                tracing::info!(path = %path.display(), records = records.len(), "Loaded durable cache snapshot");
                MemoryStore::from_records(records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryStore::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            path,
            records,
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the in-memory records out. Callers hold `write_lock`.
    async fn persist(&self) -> StoreResult<()> {
        let was_dirty = self.dirty.swap(false, Ordering::AcqRel);
        let result = self.write_snapshot().await;
        if result.is_err() && was_dirty {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    async fn write_snapshot(&self) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&self.records.snapshot())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<DurableRecord>> {
        Ok(self.records.get_live(key))
    }

    async fn put(&self, record: DurableRecord) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let key = record.cache_key.clone();
        let previous = self.records.upsert(record);
        if let Err(e) = self.persist().await {
            // Keep memory in step with what is on disk.
            match previous {
                Some(previous) => {
                    self.records.upsert(previous);
                }
                None => {
                    self.records.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn touch(&self, key: &str) -> StoreResult<()> {
        if self.records.record_hit(key) {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self.records.take_matching(pattern);
        if removed.is_empty() {
            return Ok(0);
        }
        let count = removed.len() as u64;
        if let Err(e) = self.persist().await {
            self.records.restore(removed);
            return Err(e);
        }
        Ok(count)
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self.records.remove_expired();
        if removed > 0 || self.dirty.load(Ordering::Acquire) {
            if let Err(e) = self.persist().await {
                // Expired records read as absent either way; the next rewrite drops them.
                tracing::warn!(path = %self.path.display(), removed, error = %e, "Durable snapshot is behind memory");
                return Err(e);
            }
        }
        Ok(removed)
    }

    async fn flush(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.dirty.load(Ordering::Acquire) {
            self.persist().await?;
        }
        Ok(())
    }

    async fn record_count(&self) -> StoreResult<usize> {
        Ok(self.records.count())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn record(key: &str) -> DurableRecord {
        DurableRecord::new(key, json!([1, 2, 3]), "gsc", "site-1", Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("durable.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put(record("gsc:site-1:queries")).await.unwrap();
        store.touch("gsc:site-1:queries").await.unwrap();
        store.flush().await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        let found = reopened.get("gsc:site-1:queries").await.unwrap().unwrap();
        assert_eq!(found.payload, json!([1, 2, 3]));
        assert_eq!(found.hit_count, 1);
    }

    #[tokio::test]
    async fn test_pattern_delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put(record("gsc:site-1:queries")).await.unwrap();
        store.put(record("gsc:site-1:pages")).await.unwrap();
        store.put(record("gsc:site-2:pages")).await.unwrap();
        assert_eq!(store.delete_by_pattern("gsc:site-1:*").await.unwrap(), 2);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.record_count().await.unwrap(), 1);
        assert!(reopened.get("gsc:site-2:pages").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert!(FileStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_touch_does_not_rewrite_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put(record("gsc:site-1:queries")).await.unwrap();
        let written = tokio::fs::read(&path).await.unwrap();

        store.touch("gsc:site-1:queries").await.unwrap();
        store.touch("gsc:site-1:queries").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), written);
        assert_eq!(store.get("gsc:site-1:queries").await.unwrap().unwrap().hit_count, 2);

        // Held-back counters ride along with the next sweep.
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("gsc:site-1:queries").await.unwrap().unwrap().hit_count, 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_matching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_dir = dir.path().join("cache");
        let path = snapshot_dir.join("durable.json");

        let store = FileStore::open(&path).await.unwrap();
        store.put(record("gsc:site-1:queries")).await.unwrap();
        store.put(record("gsc:site-1:pages")).await.unwrap();
        tokio::fs::remove_dir_all(&snapshot_dir).await.unwrap();

        let mut replacement = record("gsc:site-1:queries");
        replacement.payload = json!("v2");
        assert!(store.put(replacement).await.is_err());
        assert_eq!(
            store.get("gsc:site-1:queries").await.unwrap().unwrap().payload,
            json!([1, 2, 3])
        );

        assert!(store.put(record("gsc:site-2:queries")).await.is_err());
        assert!(store.get("gsc:site-2:queries").await.unwrap().is_none());

        assert!(store.delete_by_pattern("gsc:site-1:*").await.is_err());
        assert_eq!(store.record_count().await.unwrap(), 2);
    }
}
