//! Service configuration.
//!
//! Loaded from environment variables with development defaults:
//!
//! - `REPORT_CACHE_BIND`: listen address (default `0.0.0.0:8080`)
//! - `REPORT_CACHE_CAPACITY`: fast-tier entry bound (default 500)
//! - `REPORT_CACHE_SWEEP_SECS`: durable sweep interval (default 600)
//! - `REPORT_CACHE_BATCH_TIMEOUT_MS`: default batch timeout (default 10000)
//! - `REPORT_CACHE_STORE_PATH`: JSON snapshot for the durable tier; unset
//!   keeps the durable tier in memory
//! - `REPORT_CACHE_SOURCES`: comma-separated `name=url` pairs
//! - `REPORT_CACHE_UPSTREAM_TIMEOUT_SECS`: per-request upstream timeout (default 10)
//! - `REPORT_CACHE_TTL_DEFAULT_SECS`, `REPORT_CACHE_TTL_HISTORICAL_SECS`,
//!   `REPORT_CACHE_TTL_RECENT_SECS`, `REPORT_CACHE_TTL_CURRENT_SECS`

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_CAPACITY;
use crate::sweeper::DEFAULT_SWEEP_INTERVAL;
use crate::ttl::TtlPolicy;
use crate::types::SourceConfig;
use crate::upstream::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub fast_capacity: usize,
    pub sweep_interval: Duration,
    pub batch_timeout: Duration,
    pub store_path: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
    pub upstream_timeout: Duration,
    pub ttl: TtlPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            fast_capacity: DEFAULT_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            store_path: None,
            sources: Vec::new(),
            upstream_timeout: DEFAULT_REQUEST_TIMEOUT,
            ttl: TtlPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup. Unparseable values fall back to the
    /// default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let secs = |name: &str, default: Duration| {
            parsed::<u64>(&lookup, name)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let ttl = TtlPolicy {
            default_ttl: secs("REPORT_CACHE_TTL_DEFAULT_SECS", defaults.ttl.default_ttl),
            historical_ttl: secs("REPORT_CACHE_TTL_HISTORICAL_SECS", defaults.ttl.historical_ttl),
            recent_ttl: secs("REPORT_CACHE_TTL_RECENT_SECS", defaults.ttl.recent_ttl),
            current_ttl: secs("REPORT_CACHE_TTL_CURRENT_SECS", defaults.ttl.current_ttl),
        };

        Self {
            bind_addr: lookup("REPORT_CACHE_BIND").unwrap_or(defaults.bind_addr),
            fast_capacity: parsed(&lookup, "REPORT_CACHE_CAPACITY").unwrap_or(defaults.fast_capacity),
            sweep_interval: parsed::<u64>(&lookup, "REPORT_CACHE_SWEEP_SECS")
                .filter(|&secs| {
                    if secs == 0 {
                        tracing::warn!("Ignoring zero REPORT_CACHE_SWEEP_SECS");
                    }
                    secs > 0
                })
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            batch_timeout: parsed::<u64>(&lookup, "REPORT_CACHE_BATCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_timeout),
            store_path: lookup("REPORT_CACHE_STORE_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            sources: lookup("REPORT_CACHE_SOURCES")
                .map(|raw| parse_sources(&raw))
                .unwrap_or_default(),
            upstream_timeout: secs("REPORT_CACHE_UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout),
            ttl,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

/// Parse `name=url` pairs separated by commas. Malformed pairs are skipped.
pub fn parse_sources(raw: &str) -> Vec<SourceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => Some(SourceConfig {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            }),
            _ => {
                tracing::warn!(entry = %pair, "Skipping malformed source entry");
                None
            }
        })
        .collect()
}
