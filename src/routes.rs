//! HTTP surface over [`ReportCache`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;

use crate::error::FetchError;
use crate::facade::{BatchLookup, CacheStats, Invalidation, ReportCache, ResolveOptions};
use crate::key::build_key;
use crate::ttl::DateRange;
use crate::types::{BatchRequest, BatchResponse, ErrorResponse, InvalidateRequest, ResolveQuery};
use crate::upstream::HttpSource;

#[derive(Clone)]
pub struct AppState {
    pub cache: ReportCache,
    pub sources: Arc<HashMap<String, Arc<HttpSource>>>,
    pub batch_timeout: Duration,
}

impl AppState {
    pub fn new(cache: ReportCache, sources: Vec<HttpSource>, batch_timeout: Duration) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.name().to_string(), Arc::new(source)))
            .collect();
        Self {
            cache,
            sources: Arc::new(sources),
            batch_timeout,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/sources/{source}/{subject}", get(resolve_source))
        .route("/batch", post(resolve_batch))
        .route("/invalidate", post(invalidate))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

async fn resolve_source(
    State(state): State<AppState>,
    Path((source_name, subject)): Path<(String, String)>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Value>, ApiError> {
    let source = state.sources.get(&source_name).cloned().ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Unknown source: {}", source_name))),
        )
    })?;

    let range = query.date_range();
    let key = source_key(&source_name, &subject, range.as_ref());
    let params = range_params(range.as_ref());

    let mut options = ResolveOptions::new()
        .with_source(&source_name)
        .with_subject(&subject);
    if let Some(range) = range {
        options = options.with_date_range(range);
    }
    if query.fresh {
        options = options.force_fresh();
    }

    tracing::info!(key = %key, forced = query.fresh, "Resolving source lookup");
    state
        .cache
        .resolve(&key, || async move { source.fetch_json(&subject, &params).await }, options)
        .await
        .map(Json)
        .map_err(|e: FetchError| {
            tracing::error!(key = %key, error = %e, "Source lookup failed");
            (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new(e.to_string())))
        })
}

async fn resolve_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResponse> {
    let timeout = request
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.batch_timeout);

    let lookups: Vec<BatchLookup> = request
        .lookups
        .into_iter()
        .map(|lookup| {
            let range = lookup.date_range();
            let key = source_key(&lookup.source, &lookup.subject, range.as_ref());
            let params = range_params(range.as_ref());
            let source = state.sources.get(&lookup.source).cloned();
            let source_name = lookup.source.clone();
            let subject = lookup.subject.clone();

            let mut options = ResolveOptions::new()
                .with_source(&lookup.source)
                .with_subject(&lookup.subject);
            if let Some(range) = range {
                options = options.with_date_range(range);
            }

            let batch_lookup = BatchLookup::new(lookup.name, key, move || async move {
                match source {
                    Some(source) => source.fetch_json(&subject, &params).await,
                    None => Err(FetchError::Unavailable(source_name)),
                }
            })
            .with_options(options);

            match lookup.fallback {
                Some(fallback) => batch_lookup.with_fallback(fallback),
                None => batch_lookup,
            }
        })
        .collect();

    tracing::info!(lookups = lookups.len(), timeout = ?timeout, "Resolving batch");
    let results = state.cache.resolve_batch(lookups, timeout).await;
    Json(BatchResponse { results })
}

async fn invalidate(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<Invalidation>, ApiError> {
    if request.pattern.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("pattern must not be empty")),
        ));
    }
    Ok(Json(state.cache.invalidate(&request.pattern).await))
}

fn source_key(source: &str, subject: &str, range: Option<&DateRange>) -> String {
    build_key(
        source,
        subject,
        [
            ("start", range.map(|r| r.start.to_string())),
            ("end", range.map(|r| r.end.to_string())),
        ],
    )
}

fn range_params(range: Option<&DateRange>) -> Vec<(String, String)> {
    range
        .map(|r| {
            vec![
                ("start".to_string(), r.start.to_string()),
                ("end".to_string(), r.end.to_string()),
            ]
        })
        .unwrap_or_default()
}
