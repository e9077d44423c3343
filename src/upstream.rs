use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::FetchError;
use crate::types::SourceConfig;

const MAX_CONSECUTIVE_FAILURES: usize = 3;
const COOLDOWN_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCondition {
    Healthy,
    Unhealthy,
}

/// A reporting source reached over HTTP, guarded by a circuit breaker.
///
/// After [`MAX_CONSECUTIVE_FAILURES`] failures in a row the source is marked
/// unhealthy and calls fail fast until the cooldown has elapsed, at which
/// point one call is let through to probe it.
pub struct HttpSource {
    pub config: SourceConfig,
    status: RwLock<SourceState>,
    consecutive_failures: AtomicUsize,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct SourceState {
    condition: SourceCondition,
    last_failure_time: Option<Instant>,
}

impl HttpSource {
    pub fn new(config: SourceConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            config,
            status: RwLock::new(SourceState {
                condition: SourceCondition::Healthy,
                last_failure_time: None,
            }),
            consecutive_failures: AtomicUsize::new(0),
            client,
            timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn condition(&self) -> SourceCondition {
        self.status.read().condition
    }

    /// Whether a call may go out now: healthy, or unhealthy with the
    /// cooldown elapsed.
    pub fn is_available(&self) -> bool {
        let state = self.status.read();
        match state.condition {
            SourceCondition::Healthy => true,
            SourceCondition::Unhealthy => state
                .last_failure_time
                .is_some_and(|at| at.elapsed() >= COOLDOWN_DURATION),
        }
    }

    /// GET `{base_url}/{subject}` with `params` as the query string and
    /// decode the JSON body.
    pub async fn fetch_json(&self, subject: &str, params: &[(String, String)]) -> Result<Value, FetchError> {
        if !self.is_available() {
            return Err(FetchError::Unavailable(self.config.name.clone()));
        }

        match self.fetch_json_internal(subject, params).await {
            Ok(value) => {
                self.mark_success();
                Ok(value)
            }
            Err(e) => {
                self.mark_failure();
                tracing::warn!(source = %self.config.name, subject = %subject, error = %e, "Upstream fetch failed");
                Err(e)
            }
        }
    }

    async fn fetch_json_internal(&self, subject: &str, params: &[(String, String)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), subject);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn mark_success(&self) {
        self.consecutive_failures.swap(0, Ordering::SeqCst);
        let mut state = self.status.write();
        if state.condition == SourceCondition::Unhealthy {
            tracing::info!(source = %self.config.name, "Upstream source recovered");
            state.condition = SourceCondition::Healthy;
            state.last_failure_time = None;
        }
    }

    fn mark_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;

        if failures >= MAX_CONSECUTIVE_FAILURES {
            let mut state = self.status.write();
            if state.condition == SourceCondition::Healthy {
                tracing::warn!(source = %self.config.name, failures, "Upstream source marked unhealthy");
                state.condition = SourceCondition::Unhealthy;
            }
            // Restart the cooldown on every failure, including the probe.
            state.last_failure_time = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HttpSource {
        HttpSource::new(
            SourceConfig {
                name: "ads".to_string(),
                url: "http://127.0.0.1:9".to_string(),
            },
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[test]
    fn test_breaker_opens_after_consecutive_failures() {
        let source = source();
        assert!(source.is_available());

        source.mark_failure();
        source.mark_failure();
        assert_eq!(source.condition(), SourceCondition::Healthy);

        source.mark_failure();
        assert_eq!(source.condition(), SourceCondition::Unhealthy);
        assert!(!source.is_available());
    }

    #[test]
    fn test_success_closes_breaker() {
        let source = source();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            source.mark_failure();
        }
        source.mark_success();

        assert_eq!(source.condition(), SourceCondition::Healthy);
        assert!(source.is_available());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let source = source();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            source.mark_failure();
        }

        match source.fetch_json("client42", &[]).await {
            Err(FetchError::Unavailable(name)) => assert_eq!(name, "ads"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
