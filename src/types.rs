use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ttl::DateRange;

/// Upstream reporting source reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Short name used as the first cache key segment (e.g. "ads").
    pub name: String,
    pub url: String,
}

/// Query string accepted by `GET /sources/{source}/{subject}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,

    /// Bypass both cache tiers.
    #[serde(default)]
    pub fresh: bool,
}

impl ResolveQuery {
    /// Both bounds are needed for a date-scoped query; one alone is ignored.
    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            _ => None,
        }
    }
}

/// Body of `POST /batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    pub lookups: Vec<BatchLookupRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchLookupRequest {
    /// Slot name in the response.
    pub name: String,
    pub source: String,
    pub subject: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,

    /// Returned in this slot when the lookup fails or times out.
    #[serde(default)]
    pub fallback: Option<serde_json::Value>,
}

impl BatchLookupRequest {
    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: HashMap<String, Option<serde_json::Value>>,
}

/// Body of `POST /invalidate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_query_needs_both_bounds() {
        let query: ResolveQuery = serde_json::from_str(r#"{"start":"2025-01-01"}"#).unwrap();
        assert!(query.date_range().is_none());
        assert!(!query.fresh);

        let query: ResolveQuery =
            serde_json::from_str(r#"{"start":"2025-01-01","end":"2025-01-31","fresh":true}"#).unwrap();
        assert!(query.date_range().is_some());
        assert!(query.fresh);
    }

    #[test]
    fn test_batch_request_defaults() {
        let body: BatchRequest = serde_json::from_str(
            r#"{"lookups":[{"name":"spend","source":"ads","subject":"c1"}]}"#,
        )
        .unwrap();
        assert_eq!(body.timeout_ms, None);
        assert_eq!(body.lookups.len(), 1);
        assert!(body.lookups[0].fallback.is_none());
        assert!(body.lookups[0].date_range().is_none());
    }
}
