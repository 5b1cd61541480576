//! API server assembly

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::AppState;
use super::rate_limit::{RateLimitState, SlidingWindowLimiter, rate_limit_middleware};
use super::routes::{analyze, datasets, health};
use crate::core::CoreApp;
use crate::core::constants::MAX_UPLOAD_BYTES;

/// Build the router and serve until shutdown
pub async fn start(app: &CoreApp) -> Result<()> {
    let state = AppState {
        registry: app.registry.clone(),
        cache: app.cache.clone(),
        uploads_dir: app.storage.subdir(crate::core::DataSubdir::Uploads),
        llm_defaults: app.config.llm.clone(),
        limits: app.config.limits.clone(),
        shutdown_rx: app.shutdown.subscribe(),
    };

    let rate_limit_state = RateLimitState {
        limiter: Arc::new(SlidingWindowLimiter::default()),
    };

    // Analysis routes are the expensive ones; only they are throttled
    let analyze_routes = Router::new()
        .route("/analyze", post(analyze::analyze))
        .route("/analyze/stream", post(analyze::analyze_stream))
        .layer(axum::middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_middleware,
        ));

    let dataset_routes = Router::new()
        .route("/upload", post(datasets::upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .route("/dataset/create", post(datasets::create_dataset))
        .route("/dataset", get(datasets::list_datasets))
        .route("/dataset/{id}/schema", get(datasets::get_dataset_schema))
        .route("/dataset/{id}", delete(datasets::delete_dataset));

    let router = Router::new()
        .merge(analyze_routes)
        .merge(dataset_routes)
        .route("/health", get(health::health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr =
        format!("{}:{}", app.config.server.host, app.config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(app.shutdown.wait())
    .await?;

    Ok(())
}
