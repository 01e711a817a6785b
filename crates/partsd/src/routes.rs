//! API routes for partsd

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parts_common::{CacheStats, ChatRequest, ChatResponse, HealthResponse, SessionSnapshot};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/chat", post(chat))
}

async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    Json(state.engine.handle_turn(req).await)
}

// ============================================================================
// Session Routes
// ============================================================================

pub fn session_routes() -> Router<AppStateArc> {
    Router::new().route(
        "/v1/session/:id",
        get(get_session).delete(clear_session),
    )
}

async fn get_session(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    state
        .engine
        .session_snapshot(&id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session '{}' not found", id)))
}

async fn clear_session(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.engine.clear_session(&id).await {
        info!("  Cleared session {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Session '{}' not found", id)))
    }
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(state.engine.health().await)
}

// ============================================================================
// Debug Routes
// ============================================================================

pub fn debug_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/debug/cache-stats", get(cache_stats))
}

async fn cache_stats(State(state): State<AppStateArc>) -> Json<CacheStats> {
    Json(state.engine.cache_stats().await)
}

// ============================================================================
// Metrics Routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(
    State(state): State<AppStateArc>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let body = state.engine.metrics().export().map_err(|e| {
        error!("  Metrics export failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
