//! HTTP API handlers (spec §4.8/§6): a thin façade over the run orchestrator.
//! Endpoints start a run, poll its status, request incremental per-file
//! scoring, and serve raw file content for the browser UI. Field names and
//! status codes follow the polling contract in spec §6 verbatim.

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::orchestrator;
use crate::types::AppContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnalysisRequest {
    pub repo_url: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub readme_override: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnalysisResponse {
    pub run_id: String,
    pub all_files: Vec<String>,
}

/// `POST /analysis` body `{repoUrl, runId?}` → 202 `{runId, allFiles}`; 400 on
/// a missing/blank `repoUrl`; 500 on fetch failure. Blocks only on repository
/// acquisition and file-tree enumeration — the rest of the pipeline runs in
/// a background task started by `orchestrator::start`.
pub async fn start_analysis(
    State(ctx): State<AppContext>,
    Json(req): Json<StartAnalysisRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.repo_url.trim().is_empty() {
        return Err(AppError::Config("repoUrl is required".to_string()));
    }
    let (run_id, all_files) = orchestrator::start(ctx, req.run_id, req.repo_url, req.readme_override).await?;
    Ok((StatusCode::ACCEPTED, Json(StartAnalysisResponse { run_id, all_files })))
}

/// `GET /analysis/{runId}/status` → 200 `{runId, status, logHistory,
/// report|null, error|null}`; 404 if unknown.
pub async fn analysis_status(
    State(ctx): State<AppContext>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = orchestrator::status(&ctx, &run_id)?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFileRequest {
    pub file_path: String,
}

/// `POST /analysis/{runId}/score-file` body `{filePath}` → 200 ScoredFile
/// (existing entry if already scored); 404 if the run or file is missing.
pub async fn score_file(
    State(ctx): State<AppContext>,
    Path(run_id): Path<String>,
    Json(req): Json<ScoreFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scored = orchestrator::score_file(&ctx, &run_id, &req.file_path).await?;
    Ok(Json(scored))
}

#[derive(Debug, Deserialize)]
pub struct FileContentQuery {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

/// `GET /analysis/{runId}/file-content?filePath=…` → 200 `text/plain` raw
/// bytes; 400 missing query; 403 path escape; 404 missing. CPU-bound
/// filesystem work runs off the async executor, the same way the rest of
/// this service offloads blocking work.
pub async fn file_content(
    State(ctx): State<AppContext>,
    Path(run_id): Path<String>,
    Query(q): Query<FileContentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let FileContentQuery { file_path } = q;
    let bytes = tokio::task::spawn_blocking(move || orchestrator::file_content(&ctx, &run_id, &file_path))
        .await
        .map_err(|e| AppError::ScoringFailure(format!("file content task panicked: {e}")))??;
    Ok(([("content-type", "text/plain; charset=utf-8")], bytes))
}

/// `GET /health` (ambient) — liveness probe for the service, matching the
/// reference's `/health` shape.
pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": ctx.start_time.elapsed().as_secs(),
        "active_runs": ctx.runs.len(),
    }))
}
