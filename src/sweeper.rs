use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::facade::ReportCache;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shortest interval the sweeper accepts; shorter ones are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically reclaim expired entries from both tiers, off the request path.
pub fn spawn_sweeper(cache: ReportCache, every: Duration) -> JoinHandle<()> {
    let every = if every < MIN_SWEEP_INTERVAL {
        tracing::warn!(requested = ?every, using = ?MIN_SWEEP_INTERVAL, "Sweep interval too short, raising it");
        MIN_SWEEP_INTERVAL
    } else {
        every
    };

    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing has expired yet.
        interval.tick().await;

        loop {
            interval.tick().await;

            let report = cache.sweep().await;
            if report.fast > 0 || report.durable > 0 {
                tracing::info!(fast = report.fast, durable = report.durable, "Swept expired cache entries");
            } else {
                tracing::debug!("Cache sweep found nothing to remove");
            }
        }
    })
}
