//! HTTP control surface: scan submission and lifecycle control.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::control::ControlRegistry;
use crate::db::Database;
use crate::db::models::{JobType, Scan, ScanMode, ScanOptions, ScanState};
use crate::queue::JobQueue;

/// Shared state for the control API.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub queue: JobQueue,
    pub controls: Arc<ControlRegistry>,
}

/// One job in a submitted scan plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_type: JobType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubmitScanRequest {
    pub workspace_id: Uuid,
    pub target: String,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub options: Option<ScanOptions>,
    #[serde(default)]
    pub pause_on_auth_failure: bool,
    #[serde(default)]
    pub capture_browser_events: bool,
    pub jobs: Vec<JobDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitScanResponse {
    pub scan_id: Uuid,
    pub jobs_enqueued: usize,
}

/// Build the control-surface router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scans", post(submit_scan))
        .route("/scans/{id}", get(get_scan))
        .route("/scans/{id}/pause", post(pause_scan))
        .route("/scans/{id}/resume", post(resume_scan))
        .route("/scans/{id}/cancel", post(cancel_scan))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the control surface on the given port.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Control surface listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn submit_scan(
    State(state): State<AppState>,
    Json(req): Json<SubmitScanRequest>,
) -> Result<Json<SubmitScanResponse>, StatusCode> {
    let mut scan = Scan::new(req.workspace_id, req.target, req.mode)
        .with_pause_on_auth_failure(req.pause_on_auth_failure);
    if let Some(options) = req.options {
        scan = scan.with_options(options);
    }
    scan.capture_browser_events = req.capture_browser_events;
    scan.state = ScanState::Running;

    state.db.create_scan(&scan).await.map_err(|e| {
        tracing::error!("Failed to create scan: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    state.controls.register(scan.id).await;

    // Behavior baselines are enqueued ahead of everything that depends on
    // them; the queue itself guarantees only FIFO.
    let (behavior, rest): (Vec<JobDescriptor>, Vec<JobDescriptor>) =
        req.jobs.into_iter().partition(|j| {
            matches!(j.job_type, JobType::SiteBehavior | JobType::ApiBehavior)
        });

    let mut enqueued = 0;
    for descriptor in behavior.into_iter().chain(rest) {
        state
            .queue
            .enqueue(scan.id, descriptor.job_type, descriptor.payload)
            .await
            .map_err(|e| {
                tracing::error!("Failed to enqueue job: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        enqueued += 1;
    }

    tracing::info!(scan_id = %scan.id, jobs = enqueued, "Scan submitted");
    Ok(Json(SubmitScanResponse {
        scan_id: scan.id,
        jobs_enqueued: enqueued,
    }))
}

async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Scan>, StatusCode> {
    state
        .db
        .get_scan(id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn pause_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let ctrl = state.controls.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    ctrl.pause();
    state
        .db
        .update_scan_state(id, ScanState::Paused)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let ctrl = state.controls.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    ctrl.resume();
    state
        .db
        .update_scan_state(id, ScanState::Running)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let ctrl = state.controls.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    ctrl.cancel();
    state
        .db
        .update_scan_state(id, ScanState::Cancelled)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(StatusCode::ACCEPTED)
}
