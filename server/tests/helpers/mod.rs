//! Shared scaffolding for integration tests: a stub AI client that answers
//! every call shape the scoring engine issues, and an `AppContext` builder
//! wired to a scratch cache/reports directory.

pub mod fixtures;

use codereview_server::ai_client::{AiClient, ChatMessage, ChatParams, ChatResult};
use codereview_server::config::PipelineConfig;
use codereview_server::error::AppError;
use codereview_server::types::AppContext;
use codereview_core::model::Usage;
use std::sync::Arc;

/// Answers any scoring-pipeline call with one canned payload carrying every
/// field any call site might read. Real providers only ever populate the
/// fields relevant to the request they received; a stub can be looser.
pub struct StubAiClient;

#[async_trait::async_trait]
impl AiClient for StubAiClient {
    async fn chat(&self, _messages: &[ChatMessage], _params: &ChatParams) -> Result<ChatResult, AppError> {
        let content = serde_json::json!({
            "project_essence": "a tiny command-line greeter",
            "primary_domain": "rust-cli",
            "primary_stack": ["rust"],
            "core_concepts": ["greeting", "configuration"],
            "files": ["src/main.rs", "src/lib.rs", "src/types.rs"],
            "complexity": 4.0,
            "code_quality": 7.5,
            "maintainability": 7.0,
            "best_practices": 8.0,
            "group_summary": "defines a greeting helper",
            "reasoning": "small and direct",
            "reviews": [
                {"file_path": "src/main.rs", "complexity": 3.0, "code_quality": 7.0, "maintainability": 7.0, "best_practices": 7.0, "group_summary": "entry point"},
                {"file_path": "src/lib.rs", "complexity": 4.0, "code_quality": 8.0, "maintainability": 8.0, "best_practices": 8.0, "group_summary": "greet/process helpers"},
                {"file_path": "src/types.rs", "complexity": 2.0, "code_quality": 8.0, "maintainability": 8.0, "best_practices": 8.0, "group_summary": "Config struct"}
            ],
            "final_score_multiplier": 1.05,
            "refined_tech_stack": ["rust"],
            "summary": "a clean, minimal CLI fixture",
        })
        .to_string();
        Ok(ChatResult { content, usage: Usage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150 } })
    }
}

/// Builds an `AppContext` rooted at a scratch temp dir, with stub AI clients
/// standing in for the real providers.
pub fn test_context(scratch: &std::path::Path) -> AppContext {
    let config = PipelineConfig {
        cache_root: scratch.join("cache"),
        reports_root: scratch.join("reports"),
        ..PipelineConfig::default()
    };
    let tokenizer = codereview_core::tokenizer::create_tokenizer("bytes-estimate");
    let language_registry = Arc::new(codereview_core::language::LanguageRegistry::new(config.force_simple_strategy));
    let acquirer = Arc::new(codereview_server::acquirer::RepositoryAcquirer::new(config.cache_root.clone()));

    AppContext {
        config: Arc::new(config),
        tokenizer,
        language_registry,
        acquirer,
        scoring_client: Arc::new(StubAiClient),
        review_client: Arc::new(StubAiClient),
        runs: Arc::new(dashmap::DashMap::new()),
        start_time: std::time::Instant::now(),
    }
}
