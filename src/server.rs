// SYNOID Restore Dashboard Server
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Thin HTTP surface over the Job Orchestrator: model listing, live job
// status, a blocking restore endpoint and streaming of persisted results.

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt; // For oneshot
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};

use crate::agent::artifact_store::{ArtifactStore, VariantStatus};
use crate::agent::orchestrator::{JobRequest, PersistedResult, VIDEO_EXTENSIONS};
use crate::state::{JobFailure, JobStatus, KernelState};

pub type AppState = Arc<KernelState>;

#[derive(Deserialize)]
struct StreamParams {
    path: String,
}

#[derive(Serialize)]
pub struct RestoreResponse {
    #[serde(flatten)]
    pub result: PersistedResult,
    pub stream_url: String,
}

pub fn create_router(state: AppState) -> Router {
    let ui_dir = state.orchestrator.config().ui_dir.clone();
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/status", get(get_status))
        .route("/api/restore", post(handle_restore))
        .route("/api/stream", get(stream_video))
        .fallback_service(ServeDir::new(ui_dir))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    let display_addr = if addr.ip().is_unspecified() {
        format!("127.0.0.1:{}", addr.port())
    } else {
        addr.to_string()
    };
    info!("[SERVER] 🚀 Restore dashboard running on http://{}", display_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    let statuses = tokio::task::spawn_blocking(move || {
        let store = ArtifactStore::new(orchestrator.config().store_dir.clone());
        store.statuses(orchestrator.catalog())
    })
    .await;
    match statuses {
        Ok(list) => Json::<Vec<VariantStatus>>(list).into_response(),
        Err(e) => {
            error!("[SERVER] Model scan crashed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.snapshot())
}

async fn handle_restore(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> impl IntoResponse {
    let _guard = state.job_lock.lock().await;
    info!(
        "[SERVER] Restore requested: {} with {}",
        request.video.display(),
        request.variant
    );

    state.begin_job(&request.variant);
    let sink = state.progress_sink();
    let result = state.orchestrator.run(request, &sink).await;
    state.finish_job(&result);

    match result {
        Ok(persisted) => {
            let stream_url = format!("/api/stream?path={}", persisted.path.display());
            (
                StatusCode::OK,
                Json(RestoreResponse {
                    result: persisted,
                    stream_url,
                }),
            )
                .into_response()
        }
        Err(e) => {
            let code = if e.is_validation() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (code, Json(JobFailure::from(&e))).into_response()
        }
    }
}

/// Accept only video files that live inside `outputs_dir`.
pub fn validate_stream_path(raw_path: &str, outputs_dir: &Path) -> Result<PathBuf, String> {
    if raw_path.trim().is_empty() {
        return Err("Access denied: Empty path".to_string());
    }
    let path = PathBuf::from(raw_path);

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("Access denied: Path traversal detected".to_string());
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext {
        Some(e) if VIDEO_EXTENSIONS.contains(&e.as_str()) => {}
        Some(e) => return Err(format!("Access denied: Invalid file extension '.{}'", e)),
        None => return Err("Access denied: No file extension provided".to_string()),
    }

    let resolved = if path.is_absolute() {
        path
    } else {
        outputs_dir.join(path)
    };
    if !resolved.starts_with(outputs_dir) {
        return Err("Access denied: Outside the results directory".to_string());
    }
    // Symlinks must not lead out of the results directory either.
    if let (Ok(real), Ok(root)) = (resolved.canonicalize(), outputs_dir.canonicalize()) {
        if !real.starts_with(root) {
            return Err("Access denied: Outside the results directory".to_string());
        }
    }
    Ok(resolved)
}

async fn stream_video(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    req: Request,
) -> impl IntoResponse {
    let outputs_dir = state.orchestrator.config().outputs_dir.clone();
    let path = match validate_stream_path(&params.path, &outputs_dir) {
        Ok(p) => p,
        Err(e) => {
            error!("[SERVER] Stream access denied: {}", e);
            return (StatusCode::FORBIDDEN, e).into_response();
        }
    };

    if !path.is_file() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(err) => {
            error!("[SERVER] ServeFile error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
