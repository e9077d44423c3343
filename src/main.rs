use std::sync::Arc;

use report_cache::routes::{AppState, build_router};
use report_cache::sweeper::spawn_sweeper;
use report_cache::upstream::HttpSource;
use report_cache::{DurableStore, FastCache, FileStore, GatewayConfig, MemoryStore, ReportCache};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "report_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting report cache");

    let config = GatewayConfig::from_env();

    let store: Arc<dyn DurableStore> = match &config.store_path {
        Some(path) => match FileStore::open(path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                // The fast tier alone keeps the service correct, just slower.
                tracing::error!(path = %path.display(), error = %e, "Could not open durable store, falling back to memory");
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    };
    tracing::info!(backend = store.name(), capacity = config.fast_capacity, "Cache tiers ready");

    let cache = ReportCache::new(FastCache::new(config.fast_capacity), store, config.ttl);

    tracing::info!("Configured {} upstream sources", config.sources.len());
    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        tracing::info!("  - {}: {}", source.name, source.url);
        match HttpSource::new(source.clone(), config.upstream_timeout) {
            Ok(http) => sources.push(http),
            Err(e) => tracing::error!(source = %source.name, error = %e, "Skipping source"),
        }
    }

    // Start background expiry sweep
    let sweeper = spawn_sweeper(cache.clone(), config.sweep_interval);

    let state = AppState::new(cache.clone(), sources, config.batch_timeout);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", config.bind_addr, e));

    tracing::info!("Listening on http://{}", config.bind_addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    sweeper.abort();
    cache.flush().await;
    tracing::info!("Durable cache flushed");
}
