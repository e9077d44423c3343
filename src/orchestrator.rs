//! Concurrent fan-out for independent fetches.
//!
//! Every request runs as its own task and is raced against a timeout. A
//! request that fails, panics or times out yields its fallback (or `None`);
//! the others are unaffected. This module never touches a cache tier.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::FetchError;

pub type FetchFuture = BoxFuture<'static, Result<Value, FetchError>>;

/// One named member of a batch.
pub struct FetchRequest {
    name: String,
    task: FetchFuture,
    fallback: Option<Value>,
    timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            task: task.boxed(),
            fallback: None,
            timeout: None,
        }
    }

    /// Value used when this request fails or times out.
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Override the batch-wide timeout for this request only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Run every request concurrently and collect one slot per name.
///
/// Each slot holds the fetched value, the request's fallback, or `None`.
/// If two requests share a name the later one owns the slot.
pub async fn run_all(
    requests: impl IntoIterator<Item = FetchRequest>,
    timeout: Duration,
) -> HashMap<String, Option<Value>> {
    let pending = requests.into_iter().map(|request| run_one(request, timeout));
    future::join_all(pending).await.into_iter().collect()
}

async fn run_one(request: FetchRequest, default_timeout: Duration) -> (String, Option<Value>) {
    let FetchRequest {
        name,
        task,
        fallback,
        timeout,
    } = request;
    let limit = timeout.unwrap_or(default_timeout);

    let mut handle = tokio::spawn(task);
    let value = match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(Ok(value))) => {
            tracing::debug!(request = %name, "Batch fetch succeeded");
            Some(value)
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(request = %name, error = %e, "Batch fetch failed, using fallback");
            fallback
        }
        Ok(Err(e)) => {
            tracing::warn!(request = %name, error = %e, "Batch fetch task aborted, using fallback");
            fallback
        }
        Err(_) => {
            // The late result, if any, is discarded.
            handle.abort();
            tracing::warn!(request = %name, timeout = ?limit, "Batch fetch timed out, using fallback");
            fallback
        }
    };

    (name, value)
}
