//! Cache-or-fetch entry point.
//!
//! [`ReportCache::resolve`] walks fast tier → durable tier → fetcher and
//! writes a fresh answer through both tiers. Durable-tier failures only ever
//! cost latency: reads degrade to a miss and writes are logged and dropped.
//! Durable mutations go through one [`DurableWriter`] queue, so they land in
//! the order they were issued.
//!
//! Concurrent misses on the same key are not coalesced. Each caller runs its
//! own fetcher and both tiers settle on the last write.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{FastCache, FastCacheStats};
use crate::error::FetchError;
use crate::orchestrator::{self, FetchFuture, FetchRequest};
use crate::store::{DurableRecord, DurableStore};
use crate::ttl::{DateRange, TtlPolicy};
use crate::writer::{DEFAULT_QUEUE_DEPTH, DurableWriter};

pub type BoxedFetcher = Box<dyn FnOnce() -> FetchFuture + Send>;

/// Hints that steer a single lookup.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Recorded on the durable record; derived from the key when absent.
    pub source: Option<String>,
    /// Recorded on the durable record; derived from the key when absent.
    pub subject_id: Option<String>,
    /// Drives the TTL policy.
    pub date_range: Option<DateRange>,
    /// Skip both tiers and call the fetcher.
    pub force_fresh: bool,
    /// Explicit lifetime, overriding the TTL policy.
    pub ttl: Option<Duration>,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn force_fresh(mut self) -> Self {
        self.force_fresh = true;
        self
    }
}

/// One member of [`ReportCache::resolve_batch`].
pub struct BatchLookup {
    pub name: String,
    pub key: String,
    pub fetcher: BoxedFetcher,
    pub options: ResolveOptions,
    pub fallback: Option<Value>,
}

impl BatchLookup {
    pub fn new<F, Fut>(name: impl Into<String>, key: impl Into<String>, fetcher: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            key: key.into(),
            fetcher: boxed_fetcher(fetcher),
            options: ResolveOptions::default(),
            fallback: None,
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// A key to keep warm, with the fetcher that refreshes it.
pub struct PreloadEntry {
    pub key: String,
    pub fetcher: BoxedFetcher,
    pub options: ResolveOptions,
}

impl PreloadEntry {
    pub fn new<F, Fut>(key: impl Into<String>, fetcher: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetcher: boxed_fetcher(fetcher),
            options: ResolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }
}

fn boxed_fetcher<F, Fut>(fetcher: F) -> BoxedFetcher
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Box::new(move || fetcher().boxed())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    pub fast: usize,
    pub durable: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub fast: usize,
    pub durable: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub fast: FastCacheStats,
    pub durable_backend: &'static str,
    /// `None` when the durable store could not be read.
    pub durable_records: Option<usize>,
}

/// Two-tier cache in front of the upstream sources.
#[derive(Clone)]
pub struct ReportCache {
    fast: Arc<FastCache>,
    store: Arc<dyn DurableStore>,
    writer: DurableWriter,
    policy: TtlPolicy,
}

impl ReportCache {
    /// Must be called within a Tokio runtime; it starts the durable writer.
    pub fn new(fast: FastCache, store: Arc<dyn DurableStore>, policy: TtlPolicy) -> Self {
        let writer = DurableWriter::spawn(Arc::clone(&store), DEFAULT_QUEUE_DEPTH);
        Self {
            fast: Arc::new(fast),
            store,
            writer,
            policy,
        }
    }

    pub fn fast(&self) -> &FastCache {
        &self.fast
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Serve `key` from the cheapest tier that has it, calling `fetcher` only
    /// when neither tier does (or when `force_fresh` is set).
    ///
    /// The fetcher's error is returned untouched.
    pub async fn resolve<F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: ResolveOptions,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if !options.force_fresh {
            if let Some(value) = self.fast.get(key) {
                tracing::debug!(key = %key, "Fast cache hit");
                return Ok(value);
            }

            if let Some(value) = self.read_durable(key).await {
                return Ok(value);
            }
        }

        tracing::debug!(key = %key, forced = options.force_fresh, "Cache miss, fetching");
        let value = fetcher().await?;

        let ttl = options
            .ttl
            .unwrap_or_else(|| self.policy.ttl_for_today(options.date_range.as_ref()));
        self.fast.set(key, value.clone(), ttl);
        self.write_durable(key, &value, &options, ttl);

        Ok(value)
    }

    /// Resolve several independent lookups concurrently. Each slot holds the
    /// resolved value, the lookup's fallback, or `None`.
    pub async fn resolve_batch(
        &self,
        lookups: impl IntoIterator<Item = BatchLookup>,
        timeout: Duration,
    ) -> HashMap<String, Option<Value>> {
        let requests: Vec<FetchRequest> = lookups
            .into_iter()
            .map(|lookup| {
                let BatchLookup {
                    name,
                    key,
                    fetcher,
                    options,
                    fallback,
                } = lookup;
                let cache = self.clone();
                let request = FetchRequest::new(name, async move {
                    cache.resolve(&key, fetcher, options).await
                });
                match fallback {
                    Some(fallback) => request.with_fallback(fallback),
                    None => request,
                }
            })
            .collect();

        orchestrator::run_all(requests, timeout).await
    }

    /// Drop every entry matching the `*`-glob `pattern` from both tiers.
    pub async fn invalidate(&self, pattern: &str) -> Invalidation {
        // Durable first, so a concurrent miss cannot refill the fast tier from
        // a record about to be deleted.
        let durable = self.writer.delete_by_pattern(pattern).await;
        let fast = self.fast.invalidate_pattern(pattern);
        tracing::info!(pattern = %pattern, fast, durable, "Invalidated cache entries");
        Invalidation { fast, durable }
    }

    pub async fn stats(&self) -> CacheStats {
        let durable_records = match self.store.record_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(backend = self.store.name(), error = %e, "Could not count durable records");
                None
            }
        };
        CacheStats {
            fast: self.fast.stats(),
            durable_backend: self.store.name(),
            durable_records,
        }
    }

    /// Refresh, in the background, every entry that is cold or close to
    /// expiry and not already being refreshed. Returns how many refreshes
    /// were dispatched.
    pub fn preload(&self, entries: impl IntoIterator<Item = PreloadEntry>) -> usize {
        let mut dispatched = 0;
        for PreloadEntry {
            key,
            fetcher,
            mut options,
        } in entries
        {
            if !self.fast.needs_warming(&key) {
                continue;
            }
            let Some(guard) = self.fast.begin_warming(&key) else {
                continue;
            };

            // A live but ageing entry must bypass both tiers; a cold key may
            // still be served by the durable tier.
            if self.fast.remaining_ttl(&key).is_some() {
                options.force_fresh = true;
            }

            let cache = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                match cache.resolve(&key, fetcher, options).await {
                    Ok(_) => tracing::debug!(key = %key, "Preloaded cache entry"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Preload fetch failed"),
                }
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Reclaim expired entries from both tiers.
    pub async fn sweep(&self) -> SweepReport {
        let fast = self.fast.purge_expired();
        let durable = self.writer.sweep().await;
        SweepReport { fast, durable }
    }

    /// Wait until every queued durable write has landed and the store has
    /// written out anything it was holding back.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    async fn read_durable(&self, key: &str) -> Option<Value> {
        let record = match self.store.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, backend = self.store.name(), error = %e, "Durable cache read failed, treating as miss");
                return None;
            }
        };

        let remaining = record.remaining_ttl()?;
        tracing::debug!(key = %key, remaining = ?remaining, "Durable cache hit");
        self.fast.set(key, record.payload.clone(), remaining);
        self.writer.touch(key);

        Some(record.payload)
    }

    fn write_durable(&self, key: &str, value: &Value, options: &ResolveOptions, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let (source, subject_id) = match (&options.source, &options.subject_id) {
            (Some(source), Some(subject)) => (source.clone(), subject.clone()),
            (source, subject) => {
                let mut parts = key.splitn(3, ':');
                let key_source = parts.next().unwrap_or_default();
                let key_subject = parts.next().unwrap_or_default();
                (
                    source.clone().unwrap_or_else(|| key_source.to_string()),
                    subject.clone().unwrap_or_else(|| key_subject.to_string()),
                )
            }
        };

        self.writer
            .put(DurableRecord::new(key, value.clone(), source, subject_id, ttl));
    }
}
