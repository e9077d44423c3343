//! Two-tier response cache and fetch orchestration for reporting data pulled
//! from slow, rate-limited upstream sources.
//!
//! - [`ReportCache`] - cache-or-fetch entry point (fast tier → durable tier → fetcher)
//! - [`FastCache`] - bounded in-process tier with per-entry expiry
//! - [`DurableStore`] - persistent tier adapter, with [`MemoryStore`] and [`FileStore`]
//! - [`DurableWriter`] - ordered write-behind queue in front of the durable tier
//! - [`TtlPolicy`] - cache lifetime from the requested date range
//! - [`orchestrator::run_all`] - concurrent fetches with timeouts and fallbacks
//! - [`build_key`] - order-independent cache key construction

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod key;
pub mod orchestrator;
pub mod pattern;
pub mod routes;
pub mod store;
pub mod sweeper;
pub mod ttl;
pub mod types;
pub mod upstream;
pub mod writer;

pub use cache::{FastCache, FastCacheStats};
pub use config::GatewayConfig;
pub use error::{FetchError, StoreError};
pub use facade::{BatchLookup, CacheStats, Invalidation, PreloadEntry, ReportCache, ResolveOptions, SweepReport};
pub use key::{CacheKey, build_key};
pub use orchestrator::FetchRequest;
pub use store::{DurableRecord, DurableStore, FileStore, MemoryStore};
pub use ttl::{DateRange, TtlPolicy};
pub use writer::DurableWriter;
