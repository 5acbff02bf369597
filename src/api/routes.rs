use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::RunError;
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::types::{PredictionResult, Progress};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/runs", post(start_run))
        .route("/runs/:id", post(execute_run))
        .route("/runs/:id/progress", get(get_progress))
        .route("/api/run", post(run_once))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StartResponse {
    pub run_id: String,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(flatten)]
    pub prediction: PredictionResult,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_runs: usize,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub samples: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Malformed bodies are validation failures, reported like any other run error.
fn parse_request(body: &[u8]) -> Result<RunRequest, RunError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RunError::Validation("request body is required".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| RunError::Validation(format!("invalid request body: {e}")))
}

async fn start_run(State(state): State<ApiState>) -> Json<StartResponse> {
    Json(StartResponse {
        run_id: state.orchestrator.start(),
    })
}

async fn execute_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<Json<RunResponse>, RunError> {
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => {
            // the run was announced by start_run; let it finish as failed
            let _ = state.orchestrator.execute_detached(&run_id, RunRequest::default()).await;
            return Err(e);
        }
    };
    let prediction = state.orchestrator.execute_detached(&run_id, request).await?;
    Ok(Json(RunResponse {
        ok: true,
        run_id: None,
        prediction,
    }))
}

async fn run_once(State(state): State<ApiState>, body: Bytes) -> Result<Json<RunResponse>, RunError> {
    let request = parse_request(&body)?;
    let (run_id, result) = state.orchestrator.run(&request).await;
    Ok(Json(RunResponse {
        ok: true,
        run_id: Some(run_id),
        prediction: result?,
    }))
}

async fn get_progress(State(state): State<ApiState>, Path(run_id): Path<String>) -> Json<Progress> {
    Json(state.orchestrator.progress(&run_id))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_runs: state.orchestrator.active_runs(),
        runs_succeeded: state.health.runs_succeeded(),
        runs_failed: state.health.runs_failed(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        p50_ms,
        p95_ms,
        p99_ms,
        samples: state.latency.len(),
    })
}
