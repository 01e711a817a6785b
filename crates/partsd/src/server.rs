//! HTTP server for partsd

use crate::engine::Engine;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Assemble every route group with the shared middleware. Limits come
/// from the engine's config; the request timeout always outlasts a turn.
pub fn build_router(state: AppState) -> Router {
    let config = state.engine.config();
    let body_limit = config.server.max_body_bytes;
    let request_timeout = config.request_timeout();
    let state = Arc::new(state);

    Router::new()
        .merge(routes::chat_routes())
        .merge(routes::session_routes())
        .merge(routes::health_routes())
        .merge(routes::debug_routes())
        .merge(routes::metrics_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until the listener fails or ctrl-c arrives
pub async fn run(state: AppState) -> Result<()> {
    let bind = state.engine.config().server.bind.clone();
    info!(
        "  Request timeout {}s (turn deadline {}s)",
        state.engine.config().request_timeout().as_secs(),
        state.engine.config().turn_deadline().as_secs()
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
