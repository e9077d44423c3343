//! Ordered write-behind for the durable tier.
//!
//! ```text
//! resolve() ──► put / touch ──► mpsc ──► writer task ──► DurableStore
//! invalidate() ──► delete ──────┘            │
//!        ▲                                   │
//!        └──────────── oneshot reply ────────┘
//! ```
//!
//! Every mutation is applied by one task in the order it was queued, so a
//! pattern delete always lands after the upserts queued before it. Puts and
//! touches return immediately; deletes, sweeps and flushes wait for their
//! turn and report the outcome.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::store::{DurableRecord, DurableStore};

/// Queued mutations a busy store may fall behind by before puts and touches
/// are dropped.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

enum WriteCommand {
    Put(DurableRecord),
    Touch(String),
    DeletePattern { pattern: String, reply: oneshot::Sender<u64> },
    Sweep { reply: oneshot::Sender<u64> },
    Flush { reply: oneshot::Sender<()> },
}

/// Handle to the writer task. Cloning shares the queue; the task stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct DurableWriter {
    sender: mpsc::Sender<WriteCommand>,
    backend: &'static str,
}

impl DurableWriter {
    /// Start the writer task. Must be called within a Tokio runtime.
    pub fn spawn(store: Arc<dyn DurableStore>, depth: usize) -> Self {
        let backend = store.name();
        let (sender, receiver) = mpsc::channel(depth.max(1));
        tokio::spawn(write_loop(store, receiver));
        Self { sender, backend }
    }

    /// Queue an upsert without waiting for it.
    pub fn put(&self, record: DurableRecord) {
        let key = record.cache_key.clone();
        if let Err(e) = self.sender.try_send(WriteCommand::Put(record)) {
            tracing::warn!(key = %key, backend = self.backend, error = %e, "Dropping durable cache write");
        }
    }

    /// Queue a hit-count bump without waiting for it.
    pub fn touch(&self, key: &str) {
        if let Err(e) = self.sender.try_send(WriteCommand::Touch(key.to_string())) {
            tracing::debug!(key = %key, backend = self.backend, error = %e, "Dropping durable cache hit");
        }
    }

    /// Delete matching records once everything queued before has landed.
    /// Store failures are logged and count as zero.
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let pattern = pattern.to_string();
        self.request(|reply| WriteCommand::DeletePattern { pattern, reply })
            .await
            .unwrap_or(0)
    }

    pub async fn sweep(&self) -> u64 {
        self.request(|reply| WriteCommand::Sweep { reply }).await.unwrap_or(0)
    }

    /// Wait for the queue to drain and the store to write out held-back state.
    pub async fn flush(&self) {
        self.request(|reply| WriteCommand::Flush { reply }).await;
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> WriteCommand) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.sender.send(command(reply)).await.is_err() {
            tracing::warn!(backend = self.backend, "Durable writer is gone");
            return None;
        }
        response.await.ok()
    }
}

async fn write_loop(store: Arc<dyn DurableStore>, mut receiver: mpsc::Receiver<WriteCommand>) {
    let backend = store.name();
    while let Some(command) = receiver.recv().await {
        match command {
            WriteCommand::Put(record) => {
                let key = record.cache_key.clone();
                if let Err(e) = store.put(record).await {
                    tracing::warn!(key = %key, backend, error = %e, "Durable cache write failed");
                }
            }
            WriteCommand::Touch(key) => {
                if let Err(e) = store.touch(&key).await {
                    tracing::warn!(key = %key, backend, error = %e, "Failed to record durable cache hit");
                }
            }
            WriteCommand::DeletePattern { pattern, reply } => {
                let removed = store.delete_by_pattern(&pattern).await.unwrap_or_else(|e| {
                    tracing::warn!(pattern = %pattern, backend, error = %e, "Durable invalidation failed");
                    0
                });
                let _ = reply.send(removed);
            }
            WriteCommand::Sweep { reply } => {
                let removed = store.sweep_expired().await.unwrap_or_else(|e| {
                    tracing::warn!(backend, error = %e, "Durable sweep failed");
                    0
                });
                let _ = reply.send(removed);
            }
            WriteCommand::Flush { reply } => {
                if let Err(e) = store.flush().await {
                    tracing::warn!(backend, error = %e, "Durable flush failed");
                }
                let _ = reply.send(());
            }
        }
    }
    tracing::debug!(backend, "Durable writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn record(key: &str, payload: serde_json::Value) -> DurableRecord {
        DurableRecord::new(key, payload, "ads", "client42", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_delete_lands_after_queued_puts() {
        let store = Arc::new(MemoryStore::new());
        let writer = DurableWriter::spawn(store.clone(), 16);

        writer.put(record("ads-client42-campaigns", json!(1)));
        writer.put(record("ads-client42-keywords", json!(2)));
        writer.put(record("ads-client07-campaigns", json!(3)));

        assert_eq!(writer.delete_by_pattern("ads-client42-*").await, 2);
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_puts_apply_in_queue_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = DurableWriter::spawn(store.clone(), 16);

        for version in 0..10 {
            writer.put(record("ads:c1", json!(version)));
        }
        writer.flush().await;

        assert_eq!(store.snapshot()[0].payload, json!(9));
    }

    #[tokio::test]
    async fn test_touch_is_applied_in_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = DurableWriter::spawn(store.clone(), 16);

        writer.put(record("ads:c1", json!(1)));
        writer.touch("ads:c1");
        writer.touch("ads:c1");
        writer.flush().await;

        assert_eq!(store.snapshot()[0].hit_count, 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let store = Arc::new(MemoryStore::new());
        let writer = DurableWriter::spawn(store.clone(), 1);

        // Returns at once even when the queue cannot take everything.
        for n in 0..100 {
            writer.put(record(&format!("ads:c{}", n), json!(n)));
        }
        writer.flush().await;

        let stored = store.count();
        assert!((1..=100).contains(&stored));
    }
}
