//! Crate-wide error taxonomy (spec §7), collapsed to a single enum so
//! orchestrator and scoring code can propagate with `?` and the HTTP façade
//! can map every variant to a status code in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum AppError {
    Config(String),
    RepoAcquire(String),
    Parse(String),
    Provider(String),
    Transport(String),
    JsonParse(String),
    ScoringFailure(String),
    EmptyDossier,
    NotFound(String),
    Forbidden(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(m) => write!(f, "configuration error: {m}"),
            AppError::RepoAcquire(m) => write!(f, "could not acquire repository: {m}"),
            AppError::Parse(m) => write!(f, "parse error: {m}"),
            AppError::Provider(m) => write!(f, "AI provider error: {m}"),
            AppError::Transport(m) => write!(f, "transport error: {m}"),
            AppError::JsonParse(m) => write!(f, "JSON parse error: {m}"),
            AppError::ScoringFailure(m) => write!(f, "scoring failed: {m}"),
            AppError::EmptyDossier => write!(f, "no files were admitted to the final review dossier"),
            AppError::NotFound(m) => write!(f, "not found: {m}"),
            AppError::Forbidden(m) => write!(f, "forbidden: {m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Config(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::RepoAcquire(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            AppError::Parse(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            AppError::Provider(m) | AppError::Transport(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            AppError::JsonParse(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            AppError::ScoringFailure(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            AppError::EmptyDossier => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
