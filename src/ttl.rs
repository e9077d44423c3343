//! Cache lifetime as a function of the requested date range.
//!
//! Completed periods do not change upstream, so the further a range lies in
//! the past the longer its answer may be cached. Comparisons are made on
//! calendar days; the time of day never matters.

use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const HISTORICAL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const RECENT_TTL: Duration = Duration::from_secs(3 * 60 * 60);
pub const CURRENT_TTL: Duration = Duration::from_secs(60 * 60);

/// Inclusive range of reporting days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Used when the query is not date-scoped.
    pub default_ttl: Duration,
    /// Range ended before yesterday.
    pub historical_ttl: Duration,
    /// Range ended yesterday.
    pub recent_ttl: Duration,
    /// Range reaches today or later.
    pub current_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            historical_ttl: HISTORICAL_TTL,
            recent_ttl: RECENT_TTL,
            current_ttl: CURRENT_TTL,
        }
    }
}

impl TtlPolicy {
    /// TTL for `range` evaluated as if the current day were `today`.
    pub fn ttl_for(&self, range: Option<&DateRange>, today: NaiveDate) -> Duration {
        let Some(range) = range else {
            return self.default_ttl;
        };

        if range.end >= today {
            return self.current_ttl;
        }

        match today.checked_sub_days(Days::new(1)) {
            Some(yesterday) if range.end < yesterday => self.historical_ttl,
            _ => self.recent_ttl,
        }
    }

    /// TTL for `range` evaluated against the current UTC day.
    pub fn ttl_for_today(&self, range: Option<&DateRange>) -> Duration {
        self.ttl_for(range, Utc::now().date_naive())
    }
}
