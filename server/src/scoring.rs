//! Scoring Engine (spec §4.6): domain inference and file selection, per-file
//! and batched multi-file AI scoring with retry/reconciliation, preliminary
//! aggregation, and final-review dossier construction.

use crate::ai_client::{safe_json_chat, AiClient, ChatMessage, ChatParams};
use crate::config::{DossierStrategy, PipelineConfig};
use crate::error::AppError;
use codereview_core::language::LanguageRegistry;
use codereview_core::model::{
    AIScore, ChunkGroup, FileChunkGroup, FinalReview, Profile, ProjectContext, ProjectScorecard,
    ScoredChunkGroup, ScoredFile, Usage,
};
use codereview_core::tokenizer::Tokenizer;
use serde_json::Value;
use std::collections::HashMap;

const SENTINEL_CONTEXT: &str = "(no prior context in this file yet)";
const BATCH_BOUNDARY: &str = "\n=== next file ===\n";

// ---------------------------------------------------------------------------
// 4.6.1 Domain & file selection
// ---------------------------------------------------------------------------

pub struct FileSelectionResult {
    pub context: ProjectContext,
    pub selected: Vec<String>,
    pub flagged: HashMap<String, String>,
    pub usage: Usage,
}

/// Stage 1 + stage 2 of domain inference and file selection (spec §4.6.1).
pub async fn infer_context_and_select_files(
    client: &dyn AiClient,
    model: &str,
    top_p: f32,
    max_tokens: u32,
    readme_excerpt: &str,
    file_tree: &[String],
) -> Result<FileSelectionResult, AppError> {
    let context_messages = [
        ChatMessage::system(
            "You infer the domain and purpose of a software project from its README and file tree. \
             Respond as JSON: {\"project_essence\": str, \"primary_domain\": str, \"primary_stack\": [str], \"core_concepts\": [str]}.",
        ),
        ChatMessage::user(format!(
            "README excerpt:\n{readme_excerpt}\n\nFile tree:\n{}",
            file_tree.join("\n")
        )),
    ];
    let params = ChatParams { model: model.to_string(), temperature: 0.2, json_mode: true, top_p, max_tokens };
    let context_outcome = safe_json_chat(client, &context_messages, &params, 3)
        .await
        .ok_or_else(|| AppError::Provider("domain inference failed after retries".into()))?;
    let context = parse_project_context(&context_outcome.value)?;

    let select_messages = [
        ChatMessage::system(
            "Given the project context, select the files most worth reviewing for a quality scorecard. \
             Flag suspected vendored or generated paths as `<path> # <reason>` instead of selecting them. \
             Respond as JSON: {\"files\": [str]}.",
        ),
        ChatMessage::user(format!(
            "Domain: {}\nStack: {:?}\n\nFile tree:\n{}",
            context.primary_domain,
            context.primary_stack,
            file_tree.join("\n")
        )),
    ];
    let select_outcome = safe_json_chat(client, &select_messages, &params, 3)
        .await
        .ok_or_else(|| AppError::Provider("file selection failed after retries".into()))?;

    let entries = select_outcome.value["files"]
        .as_array()
        .ok_or_else(|| AppError::JsonParse("missing files array".into()))?;

    let mut selected_raw = Vec::new();
    let mut flagged = HashMap::new();
    for entry in entries {
        let Some(line) = entry.as_str() else { continue };
        if let Some((path, reason)) = split_flag(line) {
            flagged.insert(path.to_string(), reason.to_string());
        } else {
            selected_raw.push(line.to_string());
        }
    }

    let selected = resolve_selection(&selected_raw, file_tree);
    let usage = context_outcome.usage + select_outcome.usage;

    Ok(FileSelectionResult { context, selected, flagged, usage })
}

/// Splits a `<path> # <reason>` flagged entry; returns `None` for a plain selection.
fn split_flag(line: &str) -> Option<(&str, &str)> {
    let (path, reason) = line.split_once('#')?;
    Some((path.trim(), reason.trim()))
}

/// Resolves each selected path against the tree by exact match or
/// prefix-with-separator (directory expansion); unmatched paths are dropped
/// with a warning, not treated as fatal.
fn resolve_selection(selected: &[String], file_tree: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for raw in selected {
        let path = raw.trim();
        if file_tree.iter().any(|f| f == path) {
            out.push(path.to_string());
            continue;
        }
        let prefix = format!("{path}/");
        let matches: Vec<&String> = file_tree.iter().filter(|f| f.starts_with(&prefix)).collect();
        if matches.is_empty() {
            tracing::warn!(path, "selected path matched nothing in the repository tree");
        } else {
            out.extend(matches.into_iter().cloned());
        }
    }
    out.sort();
    out.dedup();
    out
}

fn parse_project_context(value: &Value) -> Result<ProjectContext, AppError> {
    Ok(ProjectContext {
        project_essence: value["project_essence"].as_str().unwrap_or_default().to_string(),
        primary_domain: value["primary_domain"].as_str().unwrap_or_default().to_string(),
        primary_stack: string_array(&value["primary_stack"]),
        core_concepts: string_array(&value["core_concepts"]),
    })
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Chunking entry point
// ---------------------------------------------------------------------------

pub fn chunk_one_file(
    code: &str,
    path: &str,
    registry: &LanguageRegistry,
    tokenizer: &dyn Tokenizer,
    cfg: &codereview_core::chunker::ChunkerConfig,
) -> FileChunkGroup {
    let ext = path.rsplit('.').next().unwrap_or("");
    let strategy = registry.resolve(ext);
    codereview_core::chunker::chunk_file(code, path, strategy.as_ref(), tokenizer, cfg)
}

// ---------------------------------------------------------------------------
// 4.6.2 Per-file chunk-group scoring
// ---------------------------------------------------------------------------

/// Scores every group of one `FileChunkGroup` in order, threading a running
/// intra-file context summary from group to group.
pub async fn score_file_groups(
    client: &dyn AiClient,
    model: &str,
    top_p: f32,
    max_tokens: u32,
    domain: &str,
    stack: &str,
    inter_file_context: &str,
    details: &FileChunkGroup,
) -> Vec<ScoredChunkGroup> {
    let mut intra_file_context = SENTINEL_CONTEXT.to_string();
    let mut out = Vec::with_capacity(details.grouped_chunks.len());

    for group in &details.grouped_chunks {
        let params = ChatParams { model: model.to_string(), temperature: 0.1, json_mode: true, top_p, max_tokens };
        let messages = [
            ChatMessage::system(scoring_system_prompt(domain, stack)),
            ChatMessage::user(group_scoring_prompt(&details.file_path, &intra_file_context, inter_file_context, group)),
        ];

        match safe_json_chat(client, &messages, &params, 1).await {
            Some(outcome) => {
                let score = parse_ai_score(&outcome.value);
                if let Some(summary) = &score.group_summary {
                    intra_file_context = summary.clone();
                }
                out.push(ScoredChunkGroup {
                    group_id: group.id,
                    score,
                    total_tokens: group.total_tokens,
                    usage: outcome.usage,
                });
            }
            None => {
                out.push(ScoredChunkGroup {
                    group_id: group.id,
                    score: AIScore::failed("scoring call failed after retries"),
                    total_tokens: group.total_tokens,
                    usage: Usage::default(),
                });
            }
        }
    }
    out
}

fn scoring_system_prompt(domain: &str, stack: &str) -> String {
    format!(
        "You score a chunk of source code from a {domain} project (stack: {stack}) on four axes \
         in [0, 10]: complexity, code_quality, maintainability, best_practices. Summarize what the \
         chunk does in `group_summary` for use as context on the next chunk of the same file. \
         Respond as JSON: {{\"complexity\": num, \"code_quality\": num, \"maintainability\": num, \
         \"best_practices\": num, \"group_summary\": str, \"reasoning\": str}}."
    )
}

fn group_scoring_prompt(file_path: &str, intra_file_context: &str, inter_file_context: &str, group: &ChunkGroup) -> String {
    format!(
        "File: {file_path}\nProject context: {inter_file_context}\nContext so far in this file: {intra_file_context}\n\nCode:\n{}",
        group.combined_text
    )
}

fn parse_ai_score(value: &Value) -> AIScore {
    AIScore {
        complexity: value["complexity"].as_f64().unwrap_or(0.0),
        code_quality: value["code_quality"].as_f64().unwrap_or(0.0),
        maintainability: value["maintainability"].as_f64().unwrap_or(0.0),
        best_practices: value["best_practices"].as_f64().unwrap_or(0.0),
        group_summary: value["group_summary"].as_str().map(str::to_string),
        reasoning: value["reasoning"].as_str().map(str::to_string),
    }
}

// ---------------------------------------------------------------------------
// 4.6.3 Batched multi-file scoring
// ---------------------------------------------------------------------------

/// First-fit-decreasing bin packing of batchable files under `batch_budget`,
/// per spec §4.6.3: sort descending, repeatedly admit everything that still
/// fits the running sum, emit, repeat over what's left.
pub fn pack_batches<'a>(files: &'a [FileChunkGroup], batch_budget: usize) -> Vec<Vec<&'a FileChunkGroup>> {
    let mut remaining: Vec<&FileChunkGroup> = files.iter().collect();
    remaining.sort_by(|a, b| b.final_token_count.cmp(&a.final_token_count));

    let mut batches = Vec::new();
    while !remaining.is_empty() {
        let mut batch = Vec::new();
        let mut running = 0usize;
        let mut leftover = Vec::new();
        for file in remaining {
            if running + file.final_token_count <= batch_budget {
                running += file.final_token_count;
                batch.push(file);
            } else {
                leftover.push(file);
            }
        }
        if batch.is_empty() {
            // A single file exceeds the budget alone; send it on its own rather than loop forever.
            batch.push(leftover.remove(0));
        }
        batches.push(batch);
        remaining = leftover;
    }
    batches
}

struct BatchOutcome {
    scored: HashMap<String, ScoredFile>,
    failed: Vec<String>,
}

async fn score_batch(
    client: &dyn AiClient,
    model: &str,
    top_p: f32,
    max_tokens: u32,
    domain: &str,
    stack: &str,
    batch: &[&FileChunkGroup],
    retries: u8,
) -> BatchOutcome {
    let batch_total_final_tokens: usize = batch.iter().map(|f| f.final_token_count).sum::<usize>().max(1);

    let prompt_body: String = batch
        .iter()
        .map(|f| format!("### {}\n{}", f.file_path, render_groups(f)))
        .collect::<Vec<_>>()
        .join(BATCH_BOUNDARY);

    let params = ChatParams { model: model.to_string(), temperature: 0.1, json_mode: true, top_p, max_tokens };
    let messages = [
        ChatMessage::system(format!(
            "You score multiple files from a {domain} project (stack: {stack}) in one pass. For each \
             file, score complexity/code_quality/maintainability/best_practices in [0, 10]. Respond as \
             JSON: {{\"reviews\": [{{\"file_path\": str, \"complexity\": num, \"code_quality\": num, \
             \"maintainability\": num, \"best_practices\": num, \"group_summary\": str}}]}}."
        )),
        ChatMessage::user(prompt_body),
    ];

    let mut scored = HashMap::new();
    let mut matched_paths: Vec<String> = Vec::new();

    if let Some(outcome) = safe_json_chat(client, &messages, &params, 1).await {
        if let Some(reviews) = outcome.value["reviews"].as_array() {
            for review in reviews {
                let Some(returned_path) = review["file_path"].as_str() else { continue };
                let Some(file) = batch.iter().find(|f| f.file_path.ends_with(returned_path)) else {
                    continue;
                };
                let score = parse_ai_score(review);
                let share = file.final_token_count as f64 / batch_total_final_tokens as f64;
                let usage = Usage {
                    prompt_tokens: (outcome.usage.prompt_tokens as f64 * share) as u64,
                    completion_tokens: (outcome.usage.completion_tokens as f64 / batch.len() as f64) as u64,
                    total_tokens: 0,
                };
                let usage = Usage { total_tokens: usage.prompt_tokens + usage.completion_tokens, ..usage };
                let group = ScoredChunkGroup {
                    group_id: 0,
                    score,
                    total_tokens: file.final_token_count,
                    usage,
                };
                let scored_file = ScoredFile::aggregate(
                    file.file_path.clone(),
                    file.total_file_tokens,
                    file.final_token_count,
                    vec![group],
                    (*file).clone(),
                    retries,
                );
                matched_paths.push(file.file_path.clone());
                scored.insert(file.file_path.clone(), scored_file);
            }
        }
    }

    let failed: Vec<String> = batch
        .iter()
        .map(|f| f.file_path.clone())
        .filter(|p| !matched_paths.contains(p))
        .collect();

    BatchOutcome { scored, failed }
}

fn render_groups(file: &FileChunkGroup) -> String {
    file.grouped_chunks.iter().map(|g| g.combined_text.as_str()).collect::<Vec<_>>().join("\n")
}

/// Runs one batch attempt per pack, then a single retry pass over anything
/// that failed, materializing terminal failures as empty scored files.
pub async fn score_batches(
    client: &dyn AiClient,
    model: &str,
    top_p: f32,
    max_tokens: u32,
    domain: &str,
    stack: &str,
    files: &[FileChunkGroup],
    batch_budget: usize,
) -> Vec<ScoredFile> {
    let batches = pack_batches(files, batch_budget);
    let mut scored: HashMap<String, ScoredFile> = HashMap::new();
    let mut failed_first_pass: Vec<&FileChunkGroup> = Vec::new();

    for batch in &batches {
        let outcome = score_batch(client, model, top_p, max_tokens, domain, stack, batch, 0).await;
        scored.extend(outcome.scored);
        for path in outcome.failed {
            if let Some(file) = files.iter().find(|f| f.file_path == path) {
                failed_first_pass.push(file);
            }
        }
    }

    if !failed_first_pass.is_empty() {
        let retry_files: Vec<FileChunkGroup> = failed_first_pass.iter().map(|f| (*f).clone()).collect();
        let retry_batches = pack_batches(&retry_files, batch_budget);
        for batch in &retry_batches {
            let outcome = score_batch(client, model, top_p, max_tokens, domain, stack, batch, 1).await;
            scored.extend(outcome.scored);
            for path in outcome.failed {
                if let Some(file) = files.iter().find(|f| f.file_path == path) {
                    scored.insert(path.clone(), ScoredFile::empty_failed(file.clone(), 1));
                }
            }
        }
    }

    files.iter().map(|f| scored.remove(&f.file_path).unwrap_or_else(|| ScoredFile::empty_failed(f.clone(), 0))).collect()
}

// ---------------------------------------------------------------------------
// 4.6.4 Preliminary aggregation
// ---------------------------------------------------------------------------

pub fn build_preliminary_scorecard(
    run_id: String,
    repo_name: String,
    model: String,
    context: &ProjectContext,
    scored_files: Vec<ScoredFile>,
) -> ProjectScorecard {
    let usage = scored_files.iter().fold(Usage::default(), |acc, f| acc + f.usage);
    let mut card = ProjectScorecard {
        run_id,
        repo_name,
        model,
        preliminary_project_score: 0.0,
        final_project_score: None,
        main_domain: context.primary_domain.clone(),
        tech_stack: context.primary_stack.clone(),
        project_essence: context.project_essence.clone(),
        profile: Profile::default(),
        usage,
        total_retries: 0,
        total_failed_files: 0,
        final_review: None,
        scored_files,
        warnings: Vec::new(),
    };
    card.sort_files();
    card.recompute_profile();
    card
}

// ---------------------------------------------------------------------------
// 4.6.5 Final review / dossier
// ---------------------------------------------------------------------------

struct DossierEntry<'a> {
    file: &'a ScoredFile,
    tokens: usize,
    text: String,
}

/// Builds the dossier per the configured strategy, bounded by `dossier_budget`.
fn build_dossier<'a>(scorecard: &'a ProjectScorecard, strategy: DossierStrategy, budget: usize) -> Vec<DossierEntry<'a>> {
    match strategy {
        DossierStrategy::GlobalTopImpact => {
            let mut files: Vec<&ScoredFile> = scorecard.scored_files.iter().collect();
            files.sort_by(|a, b| b.impact_score.partial_cmp(&a.impact_score).unwrap_or(std::cmp::Ordering::Equal));
            let mut out = Vec::new();
            let mut running = 0usize;
            for file in files {
                let tokens: usize = file.scored_chunk_groups.iter().map(|g| g.total_tokens).sum();
                if running + tokens > budget && !out.is_empty() {
                    continue;
                }
                running += tokens;
                out.push(DossierEntry { file, tokens, text: render_dossier_file(file) });
                if running >= budget {
                    break;
                }
            }
            out
        }
        DossierStrategy::TopImpactPerFile => {
            let mut picks: Vec<(&ScoredFile, &ScoredChunkGroup)> = scorecard
                .scored_files
                .iter()
                .filter_map(|f| {
                    f.scored_chunk_groups
                        .iter()
                        .filter(|g| !g.score.is_failure())
                        .max_by(|a, b| {
                            (a.score.quality_mean() * a.score.complexity)
                                .partial_cmp(&(b.score.quality_mean() * b.score.complexity))
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .map(|g| (f, g))
                })
                .collect();
            picks.sort_by(|(_, a), (_, b)| {
                (a.score.quality_mean() * a.score.complexity)
                    .partial_cmp(&(b.score.quality_mean() * b.score.complexity))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .reverse()
            });
            let mut out = Vec::new();
            let mut running = 0usize;
            for (file, group) in picks {
                if running + group.total_tokens > budget && !out.is_empty() {
                    continue;
                }
                running += group.total_tokens;
                out.push(DossierEntry {
                    file,
                    tokens: group.total_tokens,
                    text: format!("### {}\ncomplexity={:.1} quality={:.1}\n", file.file_path, group.score.complexity, group.score.quality_mean()),
                });
                if running >= budget {
                    break;
                }
            }
            out
        }
    }
}

fn render_dossier_file(file: &ScoredFile) -> String {
    let mut out = format!("### {}\n", file.file_path);
    for group in &file.scored_chunk_groups {
        out.push_str(&format!(
            "- group {} complexity={:.1} quality={:.1}\n",
            group.group_id,
            group.score.complexity,
            group.score.quality_mean()
        ));
    }
    out
}

/// Runs the final-review call over the dossier and applies its multiplier.
/// Defaults the multiplier to 1.0 if the call fails outright.
pub async fn run_final_review(
    client: &dyn AiClient,
    model: &str,
    scorecard: &mut ProjectScorecard,
    cfg: &PipelineConfig,
) -> Result<(), AppError> {
    let dossier = build_dossier(scorecard, cfg.dossier_strategy, cfg.dossier_budget);
    if dossier.is_empty() {
        return Err(AppError::EmptyDossier);
    }

    let dossier_text: String = dossier.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n");
    let params = ChatParams { model: model.to_string(), temperature: 0.3, json_mode: true, top_p: cfg.ai_top_p, max_tokens: cfg.ai_max_tokens };
    let messages = [
        ChatMessage::system(
            "You perform a holistic final review of a codebase given a dossier of its highest-impact \
             code. Respond as JSON: {\"final_score_multiplier\": num in [0.8, 1.25], \"refined_tech_stack\": \
             [str], \"summary\": str, \"reasoning\": str}.",
        ),
        ChatMessage::user(format!(
            "Domain: {}\nPreliminary profile score: {:.2}\n\nDossier:\n{dossier_text}",
            scorecard.main_domain,
            scorecard.preliminary_project_score
        )),
    ];

    let multiplier_outcome = safe_json_chat(client, &messages, &params, cfg.ai_max_retries).await;
    let (multiplier, review) = match multiplier_outcome {
        Some(outcome) => {
            let multiplier = outcome.value["final_score_multiplier"].as_f64().unwrap_or(1.0).clamp(0.8, 1.25);
            let review = FinalReview {
                final_score_multiplier: multiplier,
                refined_tech_stack: string_array(&outcome.value["refined_tech_stack"]),
                summary: outcome.value["summary"].as_str().unwrap_or_default().to_string(),
                reasoning: outcome.value["reasoning"].as_str().unwrap_or_default().to_string(),
            };
            scorecard.usage += outcome.usage;
            (multiplier, review)
        }
        None => (
            1.0,
            FinalReview {
                final_score_multiplier: 1.0,
                refined_tech_stack: scorecard.tech_stack.clone(),
                summary: String::new(),
                reasoning: "final review call failed; multiplier defaulted to 1.0".to_string(),
            },
        ),
    };

    scorecard.final_project_score = Some(scorecard.preliminary_project_score * multiplier);
    scorecard.final_review = Some(review);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codereview_core::model::{SendStrategy, TokenBreakdown};

    fn file(path: &str, final_tokens: usize) -> FileChunkGroup {
        FileChunkGroup {
            file_path: path.to_string(),
            total_file_tokens: final_tokens,
            chunks: vec![],
            grouped_chunks: vec![],
            oversized_chunks: vec![],
            send_strategy: SendStrategy::FullFile,
            final_token_count: final_tokens,
            skipped_content: vec![],
            context_header: String::new(),
            token_breakdown: TokenBreakdown::default(),
        }
    }

    #[test]
    fn pack_batches_respects_budget_and_covers_all_files() {
        let files = vec![file("a", 3000), file("b", 1000), file("c", 2500), file("d", 500)];
        let batches = pack_batches(&files, 5100);
        let total: usize = batches.iter().flatten().count();
        assert_eq!(total, 4);
        for batch in &batches {
            let sum: usize = batch.iter().map(|f| f.final_token_count).sum();
            assert!(sum <= 5100);
        }
    }

    #[test]
    fn pack_batches_places_oversized_single_file_alone() {
        let files = vec![file("huge", 10_000)];
        let batches = pack_batches(&files, 5100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn split_flag_separates_path_and_reason() {
        assert_eq!(split_flag("vendor/lib.js # vendored dependency"), Some(("vendor/lib.js", "vendored dependency")));
        assert_eq!(split_flag("src/main.rs"), None);
    }

    #[test]
    fn resolve_selection_expands_directory_prefix() {
        let tree = vec!["src/main.rs".to_string(), "src/lib.rs".to_string(), "README.md".to_string()];
        let resolved = resolve_selection(&["src".to_string()], &tree);
        assert_eq!(resolved, vec!["src/lib.rs".to_string(), "src/main.rs".to_string()]);
    }
}
