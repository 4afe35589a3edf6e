//! Shared application state: the axum `State<AppContext>` handed to every
//! handler, and the path-validation helper the file-content endpoint relies
//! on to refuse traversal outside a repository's checkout.

use crate::acquirer::RepositoryAcquirer;
use crate::ai_client::AiClient;
use crate::config::PipelineConfig;
use codereview_core::language::LanguageRegistry;
use codereview_core::model::RunState;
use codereview_core::tokenizer::Tokenizer;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Everything the pipeline needs to run a scoring job, shared across
/// concurrent runs behind `Arc`.
pub struct AppContext {
    pub config: Arc<PipelineConfig>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub language_registry: Arc<LanguageRegistry>,
    pub acquirer: Arc<RepositoryAcquirer>,
    pub scoring_client: Arc<dyn AiClient>,
    pub review_client: Arc<dyn AiClient>,
    /// Process-wide run store, keyed by run id.
    pub runs: Arc<DashMap<String, Arc<Mutex<RunState>>>>,
    /// Process start time for uptime reporting via `/health`.
    pub start_time: Instant,
}

impl Clone for AppContext {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            tokenizer: self.tokenizer.clone(),
            language_registry: self.language_registry.clone(),
            acquirer: self.acquirer.clone(),
            scoring_client: self.scoring_client.clone(),
            review_client: self.review_client.clone(),
            runs: self.runs.clone(),
            start_time: self.start_time,
        }
    }
}

/// Validates and canonicalizes a relative path, rejecting traversal attacks
/// and paths outside `repo_root`, for the file-content endpoint (spec §4.7).
pub fn validate_path(repo_root: &Path, rel_path: &str) -> Result<PathBuf, &'static str> {
    if rel_path.is_empty() || rel_path.contains("..") || rel_path.starts_with('/') {
        return Err("invalid path");
    }
    let full = repo_root.join(rel_path);
    let canonical = full.canonicalize().map_err(|_| "file not found")?;
    let root_canonical = repo_root.canonicalize().map_err(|_| "repository root not found")?;
    if !canonical.starts_with(&root_canonical) {
        return Err("path escapes repository root");
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_path_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(validate_path(tmp.path(), "../etc/passwd").is_err());
        assert!(validate_path(tmp.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn validate_path_accepts_file_within_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.rs"), "fn main() {}").unwrap();
        assert!(validate_path(tmp.path(), "main.rs").is_ok());
    }
}
