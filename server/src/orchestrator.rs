//! Run Orchestrator (spec §4.7): drives one scoring run through its state
//! machine, persists results, and serves incremental per-file scoring and
//! raw file content for an already-started run.

use crate::acquirer::RepoMeta;
use crate::error::AppError;
use crate::scoring;
use crate::types::{validate_path, AppContext};
use codereview_core::model::{
    FinalReview, LogEntry, ProjectScorecard, RunState, RunStatus, ScoredFile,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn push_log(state: &mut RunState, message: impl Into<String>) {
    let id = state.log_history.last().map(|e| e.id + 1).unwrap_or(0);
    state.log_history.push(LogEntry { id, message: message.into(), timestamp: now_ms() });
}

fn transition(state: &mut RunState, status: RunStatus, message: &str) {
    state.status = status;
    push_log(state, message.to_string());
}

/// `validate_path` collapses "doesn't exist" and "escapes the root" into one
/// `Err(&'static str)`; the façade needs them as distinct status codes (spec
/// §6: 404 missing, 403 only on escape).
fn map_path_error(message: &'static str) -> AppError {
    match message {
        "invalid path" | "path escapes repository root" => AppError::Forbidden(message.to_string()),
        _ => AppError::NotFound(message.to_string()),
    }
}

/// Starts a run: reuses a cached final report if one already exists for this
/// run id; otherwise synchronously acquires the repository and enumerates its
/// file tree (so the caller gets `allFiles` back immediately per spec §6),
/// then spawns the remainder of the pipeline — domain inference onward — as
/// a background task. The façade blocks only on acquisition + walk, never on
/// AI calls.
pub async fn start(
    ctx: AppContext,
    run_id: Option<String>,
    repo_url: String,
    readme_override: Option<String>,
) -> Result<(String, Vec<String>), AppError> {
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let repo_name = crate::acquirer::RepositoryAcquirer::basename_for(&repo_url);
    let state = Arc::new(Mutex::new(RunState::new(run_id.clone(), repo_url.clone(), repo_name)));
    ctx.runs.insert(run_id.clone(), state.clone());

    if let Some((cached, cached_path)) = load_cached_final_report(&ctx, &run_id) {
        let all_files: Vec<String> = cached.scored_files.iter().map(|f| f.file_path.clone()).collect();
        let mut guard = state.lock().expect("run mutex poisoned");
        guard.all_files = all_files.clone();
        guard.scorecard_path = Some(cached_path.to_string_lossy().to_string());
        guard.final_scorecard = Some(cached);
        transition(&mut guard, RunStatus::Complete, "resumed from cached final report");
        return Ok((run_id, all_files));
    }

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        transition(&mut guard, RunStatus::Preparing, "acquiring repository");
    }

    let acquirer = ctx.acquirer.clone();
    let repo_url_for_acquire = repo_url.clone();
    let (meta, file_tree) = tokio::task::spawn_blocking(move || -> Result<_, AppError> {
        let meta = acquirer.acquire(&repo_url_for_acquire)?;
        let files = acquirer.walk(&meta.local_path, false);
        let file_tree: Vec<String> = files.iter().map(|f| f.relative.clone()).collect();
        Ok((meta, file_tree))
    })
    .await
    .map_err(|e| AppError::RepoAcquire(format!("acquisition task panicked: {e}")))??;

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        guard.all_files = file_tree.clone();
        transition(&mut guard, RunStatus::SelectingFiles, "repository acquired; file tree enumerated");
    }

    // Scenario A (spec §8): an empty repository never reaches file selection.
    if file_tree.is_empty() {
        let mut guard = state.lock().expect("run mutex poisoned");
        guard.error = Some("no files were selected".to_string());
        transition(&mut guard, RunStatus::Error, "no files were selected");
        return Ok((run_id, file_tree));
    }

    let returned_files = file_tree.clone();
    let spawned_run_id = run_id.clone();
    let spawned_repo_url = repo_url.clone();
    tokio::task::spawn(async move {
        if let Err(e) =
            continue_pipeline(&ctx, &state, &spawned_run_id, &spawned_repo_url, readme_override, meta, file_tree).await
        {
            let mut guard = state.lock().expect("run mutex poisoned");
            guard.error = Some(e.to_string());
            transition(&mut guard, RunStatus::Error, &format!("run failed: {e}"));
        }
    });

    Ok((run_id, returned_files))
}

/// A serializable snapshot of a run's current state for the status endpoint.
/// `report`/`error` serialize as explicit `null` (not omitted) when absent,
/// matching the polling contract in spec §6.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusView {
    pub run_id: String,
    pub status: RunStatus,
    pub log_history: Vec<LogEntry>,
    pub report: Option<ProjectScorecard>,
    pub error: Option<String>,
}

pub fn status(ctx: &AppContext, run_id: &str) -> Result<RunStatusView, AppError> {
    let state = ctx.runs.get(run_id).ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
    let guard = state.lock().expect("run mutex poisoned");
    Ok(RunStatusView {
        run_id: guard.run_id.clone(),
        status: guard.status,
        log_history: guard.log_history.clone(),
        report: if guard.status == RunStatus::Complete { guard.final_scorecard.clone() } else { None },
        error: guard.error.clone(),
    })
}

/// Scores one additional file on demand, even after the run completed, and
/// re-persists the scorecard with the file inserted and re-sorted by impact.
pub async fn score_file(ctx: &AppContext, run_id: &str, path: &str) -> Result<ScoredFile, AppError> {
    let state = ctx.runs.get(run_id).ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?.clone();

    let (repo_url, domain, stack) = {
        let guard = state.lock().expect("run mutex poisoned");
        let domain = guard.final_scorecard.as_ref().map(|c| c.main_domain.clone()).unwrap_or_default();
        let stack = guard
            .final_scorecard
            .as_ref()
            .map(|c| c.tech_stack.join(", "))
            .unwrap_or_default();
        (guard.repo_url.clone(), domain, stack)
    };

    let meta = ctx.acquirer.metadata(&repo_url)?;
    let abs_path = validate_path(&meta.local_path, path).map_err(map_path_error)?;
    let code = std::fs::read_to_string(&abs_path).map_err(|e| AppError::Parse(e.to_string()))?;

    let details = scoring::chunk_one_file(&code, path, &ctx.language_registry, ctx.tokenizer.as_ref(), &ctx.config.chunker_config());
    let groups = scoring::score_file_groups(
        ctx.scoring_client.as_ref(),
        &ctx.config.scoring_model,
        ctx.config.ai_top_p,
        ctx.config.ai_max_tokens,
        &domain,
        &stack,
        "(incremental single-file scoring request)",
        &details,
    )
    .await;
    let scored = ScoredFile::aggregate(
        path.to_string(),
        details.total_file_tokens,
        details.final_token_count,
        groups,
        details,
        0,
    );

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        if guard.final_scorecard.is_none() {
            let repo_name = guard.repo_name.clone();
            guard.final_scorecard = Some(scoring::build_preliminary_scorecard(
                run_id.to_string(),
                repo_name,
                ctx.config.scoring_model.clone(),
                &codereview_core::model::ProjectContext {
                    project_essence: String::new(),
                    primary_domain: String::new(),
                    primary_stack: Vec::new(),
                    core_concepts: Vec::new(),
                },
                Vec::new(),
            ));
        }
        let card = guard.final_scorecard.as_mut().expect("just inserted above");
        card.scored_files.retain(|f| f.file_path != path);
        card.scored_files.push(scored.clone());
        card.sort_files();
        card.recompute_profile();

        // Rewrite whichever artifact is currently canonical for this run in
        // place, rather than minting a new timestamped file on every
        // incremental score (spec §5: "rewritten atomically ... whenever
        // on-demand scoring mutates it").
        let existing_path = guard.scorecard_path.clone().map(PathBuf::from).filter(|p| p.exists());
        let rewritten = if let Some(p) = existing_path {
            let ok = serde_json::to_vec_pretty(card).ok().map(|json| rewrite_atomic(&p, json)).unwrap_or(false);
            ok.then_some(p)
        } else {
            persist_project_scorecard(&ctx.config.reports_root, run_id, card)
        };
        if let Some(p) = rewritten {
            guard.scorecard_path = Some(p.to_string_lossy().to_string());
        }
    }

    Ok(scored)
}

/// Returns the raw bytes of a file under the run's repository checkout,
/// denying any path that escapes the repository root.
pub fn file_content(ctx: &AppContext, run_id: &str, path: &str) -> Result<Vec<u8>, AppError> {
    let state = ctx.runs.get(run_id).ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
    let repo_url = {
        let guard = state.lock().expect("run mutex poisoned");
        guard.repo_url.clone()
    };
    let meta = ctx.acquirer.metadata(&repo_url)?;
    let abs_path = validate_path(&meta.local_path, path).map_err(map_path_error)?;
    std::fs::read(&abs_path).map_err(|e| AppError::NotFound(e.to_string()))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The remainder of the pipeline (spec §4.7) after acquisition and file-tree
/// enumeration have already happened synchronously in `start`: domain
/// inference, file selection, chunking, scoring, and final review.
async fn continue_pipeline(
    ctx: &AppContext,
    state: &Arc<Mutex<RunState>>,
    run_id: &str,
    _repo_url: &str,
    readme_override: Option<String>,
    meta: Arc<RepoMeta>,
    file_tree: Vec<String>,
) -> Result<(), AppError> {
    let readme_excerpt = readme_override.unwrap_or_else(|| read_readme_excerpt(&meta.local_path));

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        transition(&mut guard, RunStatus::SelectingFiles, "inferring domain and selecting files");
    }
    let selection = scoring::infer_context_and_select_files(
        ctx.scoring_client.as_ref(),
        &ctx.config.scoring_model,
        ctx.config.ai_top_p,
        ctx.config.ai_max_tokens,
        &readme_excerpt,
        &file_tree,
    )
    .await?;

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        guard.project_context = Some(selection.context.clone());
        guard.all_files = selection.selected.clone();
        transition(&mut guard, RunStatus::ChunkingAndScoring, "chunking and scoring selected files");
    }

    persist_file_selection(&ctx.config.reports_root, run_id, &selection);

    let mut chunked = Vec::new();
    for rel in &selection.selected {
        let abs = meta.local_path.join(rel);
        let Ok(code) = std::fs::read_to_string(&abs) else { continue };
        let details = scoring::chunk_one_file(&code, rel, &ctx.language_registry, ctx.tokenizer.as_ref(), &ctx.config.chunker_config());
        chunked.push(details);
    }
    persist_chunking_analysis(&ctx.config.reports_root, run_id, &chunked);

    let batchable: Vec<_> = chunked.iter().filter(|f| f.is_batchable(ctx.config.batch_budget)).cloned().collect();
    let per_file: Vec<_> = chunked.into_iter().filter(|f| !f.is_batchable(ctx.config.batch_budget)).collect();

    let stack = selection.context.primary_stack.join(", ");
    let mut scored_files = scoring::score_batches(
        ctx.scoring_client.as_ref(),
        &ctx.config.scoring_model,
        ctx.config.ai_top_p,
        ctx.config.ai_max_tokens,
        &selection.context.primary_domain,
        &stack,
        &batchable,
        ctx.config.batch_budget,
    )
    .await;

    for details in per_file {
        let groups = scoring::score_file_groups(
            ctx.scoring_client.as_ref(),
            &ctx.config.scoring_model,
            ctx.config.ai_top_p,
            ctx.config.ai_max_tokens,
            &selection.context.primary_domain,
            &stack,
            "(part of the project's broader selected file set)",
            &details,
        )
        .await;
        scored_files.push(ScoredFile::aggregate(
            details.file_path.clone(),
            details.total_file_tokens,
            details.final_token_count,
            groups,
            details,
            0,
        ));
    }

    let mut scorecard = scoring::build_preliminary_scorecard(
        run_id.to_string(),
        {
            let guard = state.lock().expect("run mutex poisoned");
            guard.repo_name.clone()
        },
        ctx.config.scoring_model.clone(),
        &selection.context,
        scored_files,
    );
    scorecard.warnings.extend(selection.flagged.iter().map(|(path, reason)| format!("{path}: {reason}")));
    persist_project_scorecard(&ctx.config.reports_root, run_id, &scorecard);

    {
        let mut guard = state.lock().expect("run mutex poisoned");
        transition(&mut guard, RunStatus::FinalReview, "running holistic final review");
    }
    match scoring::run_final_review(ctx.review_client.as_ref(), &ctx.config.review_model, &mut scorecard, &ctx.config).await {
        Ok(()) => {}
        Err(AppError::EmptyDossier) => {
            scorecard.warnings.push("final review skipped: dossier was empty".to_string());
            scorecard.final_review = Some(FinalReview {
                final_score_multiplier: 1.0,
                refined_tech_stack: scorecard.tech_stack.clone(),
                summary: String::new(),
                reasoning: "no files were admitted to the final review dossier".to_string(),
            });
            scorecard.final_project_score = Some(scorecard.preliminary_project_score);
        }
        Err(e) => return Err(e),
    }

    let calibrated_path = persist_calibrated_scorecard(&ctx.config.reports_root, run_id, &scorecard);

    let mut guard = state.lock().expect("run mutex poisoned");
    guard.scorecard_path = calibrated_path.map(|p| p.to_string_lossy().to_string());
    guard.final_scorecard = Some(scorecard);
    transition(&mut guard, RunStatus::Complete, "run complete");
    Ok(())
}

fn read_readme_excerpt(repo_root: &std::path::Path) -> String {
    for candidate in ["README.md", "README", "readme.md", "Readme.md"] {
        if let Ok(text) = std::fs::read_to_string(repo_root.join(candidate)) {
            return text.chars().take(4000).collect();
        }
    }
    String::new()
}

// ---------------------------------------------------------------------------
// Filesystem layout under the reports root (spec §6):
//   run-<runId>/chunking-analysis.json
//   run-<runId>/file-selection.json
//   run-<runId>/project-scorecard.json
//   run-<runId>/final-reviews2/calibrated-scorecard-<ts>.json  (canonical)
// ---------------------------------------------------------------------------

fn run_dir(reports_root: &std::path::Path, run_id: &str) -> PathBuf {
    reports_root.join(format!("run-{run_id}"))
}

fn final_reviews_dir(reports_root: &std::path::Path, run_id: &str) -> PathBuf {
    run_dir(reports_root, run_id).join("final-reviews2")
}

/// Writes `bytes` to `dir/filename` atomically via a temp file plus rename,
/// so readers never observe a partial write. Returns the final path on
/// success.
fn write_atomic(dir: &std::path::Path, filename: &str, bytes: Vec<u8>) -> Option<PathBuf> {
    std::fs::create_dir_all(dir).ok()?;
    let final_path = dir.join(filename);
    let tmp_path = dir.join(format!("{filename}.tmp"));
    std::fs::write(&tmp_path, bytes).ok()?;
    std::fs::rename(&tmp_path, &final_path).ok()?;
    Some(final_path)
}

/// Rewrites an already-written artifact in place, atomically.
fn rewrite_atomic(path: &std::path::Path, bytes: Vec<u8>) -> bool {
    let Some(dir) = path.parent() else { return false };
    let Some(filename) = path.file_name().and_then(|f| f.to_str()) else { return false };
    write_atomic(dir, filename, bytes).is_some()
}

/// Full chunker report for every selected file (spec §6).
fn persist_chunking_analysis(
    reports_root: &std::path::Path,
    run_id: &str,
    chunked: &[codereview_core::model::FileChunkGroup],
) {
    if let Ok(json) = serde_json::to_vec_pretty(chunked) {
        write_atomic(&run_dir(reports_root, run_id), "chunking-analysis.json", json);
    }
}

/// The domain/file-selection cache (spec §6).
fn persist_file_selection(reports_root: &std::path::Path, run_id: &str, selection: &scoring::FileSelectionResult) {
    let payload = serde_json::json!({
        "context": selection.context,
        "selected": selection.selected,
        "flagged": selection.flagged,
    });
    if let Ok(json) = serde_json::to_vec_pretty(&payload) {
        write_atomic(&run_dir(reports_root, run_id), "file-selection.json", json);
    }
}

/// The preliminary (pre-final-review) scorecard (spec §6).
fn persist_project_scorecard(reports_root: &std::path::Path, run_id: &str, scorecard: &ProjectScorecard) -> Option<PathBuf> {
    let json = serde_json::to_vec_pretty(scorecard).ok()?;
    write_atomic(&run_dir(reports_root, run_id), "project-scorecard.json", json)
}

/// The calibrated (post-final-review) scorecard, timestamped so the most
/// recent one is the canonical artifact (spec §6, §9 cache-hit selection).
fn persist_calibrated_scorecard(reports_root: &std::path::Path, run_id: &str, scorecard: &ProjectScorecard) -> Option<PathBuf> {
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    let json = serde_json::to_vec_pretty(scorecard).ok()?;
    write_atomic(&final_reviews_dir(reports_root, run_id), &format!("calibrated-scorecard-{ts}.json"), json)
}

/// Looks for a previously-persisted final report for this run id under
/// `reports_root/run-<runId>/final-reviews2/`, per spec §4.7/§9's cache-hit
/// short-circuit: among all `calibrated-scorecard-*.json` files, the one
/// with the newest `SystemTime` (compared at full precision, no truncation)
/// is canonical.
fn load_cached_final_report(ctx: &AppContext, run_id: &str) -> Option<(ProjectScorecard, PathBuf)> {
    let dir = final_reviews_dir(&ctx.config.reports_root, run_id);
    let entries = std::fs::read_dir(&dir).ok()?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_candidate = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("calibrated-scorecard-") && n.ends_with(".json"))
            .unwrap_or(false);
        if !is_candidate {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else { continue };
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }

    let (_, path) = newest?;
    let text = std::fs::read_to_string(&path).ok()?;
    let card: ProjectScorecard = serde_json::from_str(&text).ok()?;
    if card.final_project_score.is_some() {
        Some((card, path))
    } else {
        None
    }
}
