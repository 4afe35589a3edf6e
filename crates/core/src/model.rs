//! Data model for the chunking and scoring pipeline: chunks, groups, scored
//! files, and the project scorecard. Types here carry no behavior beyond
//! small derived accessors — the algorithms that build them live in
//! `chunker`, and in the server crate's `scoring` module.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chunk / group primitives
// ---------------------------------------------------------------------------

/// Outer scaffolding trimmed around a set of sub-chunks: the parent's opening
/// text up to the first sub-node, and its closing text after the last, joined
/// by a placeholder when rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellContext {
    pub text: String,
    pub tokens: usize,
}

pub const SHELL_PLACEHOLDER: &str = "/* ... sub-chunks omitted ... */";

/// A single AST-derived or fallback-split contiguous code fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub original_text: String,
    pub code_tokens: usize,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub shell_context: Option<ShellContext>,
    pub oversized: bool,
    pub skip_reason: Option<String>,
}

impl Chunk {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

/// A record of a chunk that was dropped from scoring because a language
/// strategy judged it boilerplate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedContent {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
}

/// An ordered collection of chunks concatenated under a token budget into a
/// single AI input. `total_tokens` is always the tokenizer's count over
/// `combined_text`, never a sum of member chunk tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGroup {
    pub id: usize,
    pub chunks: Vec<Chunk>,
    pub combined_text: String,
    pub total_tokens: usize,
    pub start_line: usize,
    pub end_line: usize,
}

/// Per-file routing decision made by the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStrategy {
    FullFile,
    SingleGroup,
    MultipleGroups,
    Unprocessed,
}

/// Reconciled token accounting over a whole file's chunking output.
/// Invariant: `final_sent == code_in_groups + file_header_in_groups +
/// shell_context_in_groups + separator_in_groups`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub original_file_tokens: usize,
    pub code_in_groups: usize,
    pub file_header_in_groups: usize,
    pub shell_context_in_groups: usize,
    pub separator_in_groups: usize,
    pub final_sent: usize,
    pub total_savings: usize,
    pub savings_percentage: f64,
}

impl TokenBreakdown {
    pub fn reconcile(original_file_tokens: usize, final_sent: usize) -> TokenBreakdownBuilder {
        TokenBreakdownBuilder { original_file_tokens, final_sent, ..Default::default() }
    }
}

#[derive(Default)]
pub struct TokenBreakdownBuilder {
    pub original_file_tokens: usize,
    pub code_in_groups: usize,
    pub file_header_in_groups: usize,
    pub shell_context_in_groups: usize,
    pub final_sent: usize,
}

impl TokenBreakdownBuilder {
    /// Derives `separator_in_groups` by subtraction so the four components
    /// reconcile to `final_sent` exactly, per spec §4.4 step 7.
    pub fn finish(self) -> TokenBreakdown {
        let known = self.code_in_groups + self.file_header_in_groups + self.shell_context_in_groups;
        let separator_in_groups = self.final_sent.saturating_sub(known);
        let total_savings = self.original_file_tokens.saturating_sub(self.final_sent);
        let savings_percentage = if self.original_file_tokens == 0 {
            0.0
        } else {
            total_savings as f64 / self.original_file_tokens as f64
        };
        TokenBreakdown {
            original_file_tokens: self.original_file_tokens,
            code_in_groups: self.code_in_groups,
            file_header_in_groups: self.file_header_in_groups,
            shell_context_in_groups: self.shell_context_in_groups,
            separator_in_groups,
            final_sent: self.final_sent,
            total_savings,
            savings_percentage,
        }
    }
}

/// The complete chunking output for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkGroup {
    pub file_path: String,
    pub total_file_tokens: usize,
    /// Every chunk emitted for the file, including skipped ones, in start_line order.
    pub chunks: Vec<Chunk>,
    /// The groups actually sent for scoring.
    pub grouped_chunks: Vec<ChunkGroup>,
    pub oversized_chunks: Vec<Chunk>,
    pub send_strategy: SendStrategy,
    pub final_token_count: usize,
    pub skipped_content: Vec<SkippedContent>,
    pub context_header: String,
    pub token_breakdown: TokenBreakdown,
}

impl FileChunkGroup {
    pub fn is_batchable(&self, batch_budget: usize) -> bool {
        matches!(self.send_strategy, SendStrategy::FullFile | SendStrategy::SingleGroup)
            && self.final_token_count < batch_budget
    }
}

// ---------------------------------------------------------------------------
// Scoring outputs
// ---------------------------------------------------------------------------

/// Raw AI judgment for one chunk group. Numeric axes are expected in [0, 10].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AIScore {
    pub complexity: f64,
    pub code_quality: f64,
    pub maintainability: f64,
    pub best_practices: f64,
    #[serde(default)]
    pub group_summary: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AIScore {
    /// A zeroed score used for failed groups/files; `complexity == 0.0` is
    /// what per-file averaging uses to recognize and exclude a failure.
    pub fn failed(summary: impl Into<String>) -> Self {
        Self { group_summary: Some(summary.into()), ..Default::default() }
    }

    pub fn is_failure(&self) -> bool {
        self.complexity <= 0.0
    }

    /// Mean of quality/maintainability/best_practices — the "quality" axis
    /// used to compute impact_score.
    pub fn quality_mean(&self) -> f64 {
        (self.code_quality + self.maintainability + self.best_practices) / 3.0
    }
}

/// Token usage reported by (or reconciled for) an AI call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl std::ops::Add for Usage {
    type Output = Usage;
    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunkGroup {
    pub group_id: usize,
    pub score: AIScore,
    pub total_tokens: usize,
    pub usage: Usage,
}

/// The fully-aggregated per-file scoring result. Immutable once scoring
/// (including any retry) has completed for the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFile {
    pub file_path: String,
    pub total_original_tokens: usize,
    pub final_token_count: usize,
    pub impact_score: f64,
    pub average_complexity: f64,
    pub average_quality: f64,
    pub usage: Usage,
    /// 1 iff the file was recovered after a failed first batch attempt, else 0.
    pub retries: u8,
    pub had_error: bool,
    pub scored_chunk_groups: Vec<ScoredChunkGroup>,
    pub chunking_details: FileChunkGroup,
}

impl ScoredFile {
    /// Builds the averaged fields from successful (non-failure) groups,
    /// token-weighted by each group's `total_tokens`. Per spec §4.6.2/§8.7,
    /// `impact_score = average_quality * average_complexity`.
    pub fn aggregate(
        file_path: String,
        total_original_tokens: usize,
        final_token_count: usize,
        scored_groups: Vec<ScoredChunkGroup>,
        chunking_details: FileChunkGroup,
        retries: u8,
    ) -> Self {
        let successful: Vec<&ScoredChunkGroup> =
            scored_groups.iter().filter(|g| !g.score.is_failure()).collect();

        let weight_sum: usize = successful.iter().map(|g| g.total_tokens).sum();
        let (average_complexity, average_quality) = if weight_sum == 0 {
            (0.0, 0.0)
        } else {
            let complexity: f64 = successful
                .iter()
                .map(|g| g.score.complexity * g.total_tokens as f64)
                .sum::<f64>()
                / weight_sum as f64;
            let quality: f64 = successful
                .iter()
                .map(|g| g.score.quality_mean() * g.total_tokens as f64)
                .sum::<f64>()
                / weight_sum as f64;
            (complexity, quality)
        };

        let usage = scored_groups.iter().fold(Usage::default(), |acc, g| acc + g.usage);
        let had_error = successful.is_empty() && !scored_groups.is_empty();

        Self {
            file_path,
            total_original_tokens,
            final_token_count,
            impact_score: average_quality * average_complexity,
            average_complexity,
            average_quality,
            usage,
            retries,
            had_error,
            scored_chunk_groups: scored_groups,
            chunking_details,
        }
    }

    /// An all-zero, terminal-failure ScoredFile for a file that never produced
    /// a successful group, after exhausting retries.
    pub fn empty_failed(chunking_details: FileChunkGroup, retries: u8) -> Self {
        let total_original_tokens = chunking_details.total_file_tokens;
        let final_token_count = chunking_details.final_token_count;
        Self {
            file_path: chunking_details.file_path.clone(),
            total_original_tokens,
            final_token_count,
            impact_score: 0.0,
            average_complexity: 0.0,
            average_quality: 0.0,
            usage: Usage::default(),
            retries,
            had_error: true,
            scored_chunk_groups: Vec::new(),
            chunking_details,
        }
    }
}

// ---------------------------------------------------------------------------
// Project-level results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Profile {
    pub complexity: f64,
    pub quality: f64,
    pub maintainability: f64,
    pub best_practices: f64,
}

impl Profile {
    /// `0.40*complexity + 0.25*quality + 0.15*maintainability + 0.20*best_practices`.
    pub fn weighted_score(&self) -> f64 {
        0.40 * self.complexity + 0.25 * self.quality + 0.15 * self.maintainability + 0.20 * self.best_practices
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReview {
    pub final_score_multiplier: f64,
    pub refined_tech_stack: Vec<String>,
    pub summary: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_essence: String,
    pub primary_domain: String,
    pub primary_stack: Vec<String>,
    pub core_concepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectScorecard {
    pub run_id: String,
    pub repo_name: String,
    pub model: String,
    pub preliminary_project_score: f64,
    pub final_project_score: Option<f64>,
    pub main_domain: String,
    pub tech_stack: Vec<String>,
    pub project_essence: String,
    pub profile: Profile,
    pub usage: Usage,
    pub total_retries: u64,
    pub total_failed_files: u64,
    pub final_review: Option<FinalReview>,
    /// Sorted by `impact_score` descending.
    pub scored_files: Vec<ScoredFile>,
    pub warnings: Vec<String>,
}

impl ProjectScorecard {
    pub fn sort_files(&mut self) {
        self.scored_files
            .sort_by(|a, b| b.impact_score.partial_cmp(&a.impact_score).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Re-derives `profile` and `preliminary_project_score` from the current
    /// `scored_files`, token-weighted by `total_original_tokens` per §4.6.4.
    pub fn recompute_profile(&mut self) {
        let weight_sum: usize = self.scored_files.iter().map(|f| f.total_original_tokens).sum();
        if weight_sum == 0 {
            self.profile = Profile::default();
            self.preliminary_project_score = 0.0;
            return;
        }
        let mut profile = Profile::default();
        for f in &self.scored_files {
            let w = f.total_original_tokens as f64 / weight_sum as f64;
            profile.complexity += f.average_complexity * w;
            // average_quality already folds quality/maintainability/best_practices
            // together per file; the project profile keeps them separately by
            // re-deriving maintainability/best_practices from the file's groups.
            let (q, m, b) = per_file_axis_means(f);
            profile.quality += q * w;
            profile.maintainability += m * w;
            profile.best_practices += b * w;
        }
        self.profile = profile;
        self.preliminary_project_score = profile.weighted_score();
        self.total_retries = self.scored_files.iter().map(|f| f.retries as u64).sum();
        self.total_failed_files = self.scored_files.iter().filter(|f| f.had_error).count() as u64;
    }
}

/// Token-weighted mean of quality/maintainability/best_practices across a
/// file's successful groups, kept separate for the project-level profile.
fn per_file_axis_means(file: &ScoredFile) -> (f64, f64, f64) {
    let successful: Vec<&ScoredChunkGroup> =
        file.scored_chunk_groups.iter().filter(|g| !g.score.is_failure()).collect();
    let weight_sum: usize = successful.iter().map(|g| g.total_tokens).sum();
    if weight_sum == 0 {
        return (0.0, 0.0, 0.0);
    }
    let mut q = 0.0;
    let mut m = 0.0;
    let mut b = 0.0;
    for g in &successful {
        let w = g.total_tokens as f64 / weight_sum as f64;
        q += g.score.code_quality * w;
        m += g.score.maintainability * w;
        b += g.score.best_practices * w;
    }
    (q, m, b)
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Preparing,
    SelectingFiles,
    ChunkingAndScoring,
    FinalReview,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub repo_url: String,
    pub repo_name: String,
    pub status: RunStatus,
    pub log_history: Vec<LogEntry>,
    pub project_context: Option<ProjectContext>,
    pub final_scorecard: Option<ProjectScorecard>,
    pub scorecard_path: Option<String>,
    pub error: Option<String>,
    pub all_files: Vec<String>,
}

impl RunState {
    pub fn new(run_id: String, repo_url: String, repo_name: String) -> Self {
        Self {
            run_id,
            repo_url,
            repo_name,
            status: RunStatus::Preparing,
            log_history: Vec::new(),
            project_context: None,
            final_scorecard: None,
            scorecard_path: None,
            error: None,
            all_files: Vec::new(),
        }
    }
}
