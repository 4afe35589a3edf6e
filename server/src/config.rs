//! Runtime configuration (spec §6). Defaults are hardcoded; a
//! `.codereview.toml` file in the current directory overrides them, matching
//! the layered-config habit the rest of this stack follows for its own
//! project config files.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_tokens_per_chunk: usize,
    pub max_tokens_per_group: usize,
    pub max_context_tokens: usize,
    pub context_item_limit: usize,
    pub boilerplate_threshold: f64,
    pub batch_budget: usize,
    pub dossier_budget: usize,
    pub ai_timeout_ms: u64,
    pub ai_max_retries: u32,
    pub ai_top_p: f32,
    pub ai_max_tokens: u32,
    pub force_simple_strategy: bool,
    pub cache_root: PathBuf,
    pub reports_root: PathBuf,
    pub scoring_model: String,
    pub review_model: String,
    pub scoring_provider: String,
    pub review_provider: String,
    pub dossier_strategy: DossierStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierStrategy {
    GlobalTopImpact,
    TopImpactPerFile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 800,
            max_tokens_per_group: 2500,
            max_context_tokens: 200,
            context_item_limit: 15,
            boilerplate_threshold: 0.6,
            batch_budget: 5100,
            dossier_budget: 16_000,
            ai_timeout_ms: 45_000,
            ai_max_retries: 3,
            ai_top_p: 1.0,
            ai_max_tokens: 4096,
            force_simple_strategy: false,
            cache_root: PathBuf::from(".codereview-cache"),
            reports_root: PathBuf::from(".codereview-reports"),
            scoring_model: "gpt-4o-mini".to_string(),
            review_model: "gpt-4o".to_string(),
            scoring_provider: "openai".to_string(),
            review_provider: "openai".to_string(),
            dossier_strategy: DossierStrategy::GlobalTopImpact,
        }
    }
}

impl PipelineConfig {
    /// Loads defaults, then overlays `.codereview.toml` in `dir` if present.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(".codereview.toml");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                Self::default()
            }
        }
    }

    pub fn chunker_config(&self) -> codereview_core::chunker::ChunkerConfig {
        codereview_core::chunker::ChunkerConfig {
            max_tokens_per_chunk: self.max_tokens_per_chunk,
            max_tokens_per_group: self.max_tokens_per_group,
            max_context_tokens: self.max_context_tokens,
            context_item_limit: self.context_item_limit,
            boilerplate_threshold: self.boilerplate_threshold,
        }
    }
}
