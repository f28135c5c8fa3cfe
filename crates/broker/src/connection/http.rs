// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface of a connection agent: the WebSocket upgrade on any path and
//! a health probe.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{ws, ConnectionAgent};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent: String,
    pub connections: usize,
}

/// Build the axum `Router` for one connection agent.
pub fn build_router(agent: Arc<ConnectionAgent>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // Clients may connect on any path.
        .route("/", get(ws::ws_handler))
        .route("/{*path}", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(agent)
}

/// `GET /api/v1/health`
pub async fn health(State(agent): State<Arc<ConnectionAgent>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        agent: agent.name().to_owned(),
        connections: agent.connection_count(),
    })
}
