//! HTTP handlers of the worker API.
//!
//! | Method | Path                                  |
//! |--------|---------------------------------------|
//! | POST   | `/cube`                               |
//! | POST   | `/cube/:cube_id/:chunk_id/start`      |
//! | GET    | `/cube/:cube_id/:chunk_id/download`   |
//! | GET    | `/health`, `/stats`, `/metrics`       |

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::{debug, warn};

use cube_engine::cube::CachedCube;
use cube_engine::exec::{RegisterResponse, WireError};
use cube_engine::{CacheStats, ChunkIndex, Cube, CubeError, CubeId, CubeSpec};

use crate::state::AppState;

/// Error returned by the worker handlers.
///
/// Every error body is a [`WireError`], so the master can rebuild the
/// original error kind.
#[derive(Debug)]
pub enum ApiError {
    UnknownCube(u64),
    Cube(CubeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownCube(id) => (
                StatusCode::NOT_FOUND,
                WireError::from(&CubeError::config(format!("unknown cube {}", id))),
            ),
            ApiError::Cube(e) => {
                let status = match e {
                    CubeError::Config(_)
                    | CubeError::ReferenceMismatch(_)
                    | CubeError::OutOfBounds { .. }
                    | CubeError::Serialization(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, WireError::from(&e))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<CubeError> for ApiError {
    fn from(e: CubeError) -> Self {
        ApiError::Cube(e)
    }
}

async fn lookup(
    state: &AppState,
    cube_id: u64,
    chunk_id: u64,
) -> Result<(Arc<CachedCube>, ChunkIndex), ApiError> {
    let cube = state
        .cube(CubeId(cube_id))
        .await
        .ok_or(ApiError::UnknownCube(cube_id))?;
    let idx = cube.reference().from_linear(chunk_id)?;
    Ok((cube, idx))
}

/// POST /cube - Register a cube graph
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(spec): Json<CubeSpec>,
) -> Result<Json<RegisterResponse>, ApiError> {
    counter!("cube_worker_requests_total", "endpoint" => "register").increment(1);
    let id = state.register(&spec).await?;
    Ok(Json(RegisterResponse { cube_id: id.0 }))
}

/// POST /cube/:cube_id/:chunk_id/start - Compute a chunk into the cache
///
/// A failure is recorded and handed to the next download of the chunk.
pub async fn start_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((cube_id, chunk_id)): Path<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    counter!("cube_worker_requests_total", "endpoint" => "start").increment(1);
    let (cube, idx) = lookup(&state, cube_id, chunk_id).await?;
    debug!(cube_id, chunk = %idx, "Starting chunk");
    let id = CubeId(cube_id);
    state.take_failure(id, idx);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = cube.shared_chunk(idx) {
            warn!(cube_id, chunk = %idx, error = %e, "Chunk computation failed");
            counter!("cube_worker_chunk_failures_total").increment(1);
            state.record_failure(id, idx, e);
        }
    });
    Ok(StatusCode::ACCEPTED)
}

/// GET /cube/:cube_id/:chunk_id/download - Chunk bytes
///
/// Returns the recorded error of a failed start without recomputing.
/// Otherwise waits for a started computation, or computes the chunk if it
/// was never started or has already been evicted.
pub async fn download_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((cube_id, chunk_id)): Path<(u64, u64)>,
) -> Result<Response, ApiError> {
    counter!("cube_worker_requests_total", "endpoint" => "download").increment(1);
    let (cube, idx) = lookup(&state, cube_id, chunk_id).await?;
    let id = CubeId(cube_id);
    if let Some(e) = state.take_failure(id, idx) {
        debug!(cube_id, chunk = %idx, "Returning recorded failure");
        return Err(e.into());
    }
    let result = tokio::task::spawn_blocking(move || cube.shared_chunk(idx))
        .await
        .map_err(|e| CubeError::Internal(format!("chunk task failed: {}", e)))?;
    let chunk = match result {
        Ok(chunk) => chunk,
        Err(e) => {
            // Drop any copy recorded by a concurrent start of this chunk.
            state.take_failure(id, idx);
            return Err(e.into());
        }
    };
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        chunk.encode(),
    )
        .into_response())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /health - Basic health check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub cubes: usize,
    pub uptime_secs: u64,
    pub hit_rate: f64,
    pub cache: CacheStats,
}

/// GET /stats - Cache statistics
pub async fn stats_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StatsResponse> {
    let cache = state.cache.stats();
    Json(StatsResponse {
        cubes: state.cube_count().await,
        uptime_secs: state.started.elapsed().as_secs(),
        hit_rate: cache.hit_rate(),
        cache,
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
