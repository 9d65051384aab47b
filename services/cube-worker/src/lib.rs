//! Cube Worker Service Library
//!
//! HTTP server computing chunks of registered cube graphs on behalf of a
//! swarm master.

pub mod config;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Router with every worker route except `/metrics`, which needs the
/// process-wide Prometheus recorder.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cube", post(handlers::register_handler))
        .route(
            "/cube/:cube_id/:chunk_id/start",
            post(handlers::start_handler),
        )
        .route(
            "/cube/:cube_id/:chunk_id/download",
            get(handlers::download_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/stats", get(handlers::stats_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
