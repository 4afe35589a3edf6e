//! The syntactic chunker: turns a file's source text into a [`FileChunkGroup`]
//! by walking a [`LanguageStrategy`]'s top-level nodes, sub-chunking anything
//! too large, grouping the result under a token budget, and reconciling a
//! token-accounting breakdown over the whole process. See spec §4.4.

use crate::language::{build_shell_context, AstNode, LanguageStrategy};
use crate::model::{
    Chunk, ChunkGroup, FileChunkGroup, SendStrategy, SkippedContent, TokenBreakdown,
};
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_tokens_per_chunk: usize,
    pub max_tokens_per_group: usize,
    pub max_context_tokens: usize,
    pub context_item_limit: usize,
    pub boilerplate_threshold: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 800,
            max_tokens_per_group: 2500,
            max_context_tokens: 200,
            context_item_limit: 15,
            boilerplate_threshold: 0.6,
        }
    }
}

const SEPARATOR_PREAMBLE: &str = "// --- chunk";

/// Runs the full algorithm of spec §4.4 over one file's source text.
pub fn chunk_file(
    code: &str,
    path: &str,
    strategy: &dyn LanguageStrategy,
    tokenizer: &dyn Tokenizer,
    cfg: &ChunkerConfig,
) -> FileChunkGroup {
    let total_file_tokens = tokenizer.count_tokens(code);

    // Step 1: tentative header, truncated from the tail until it fits.
    let tree = strategy.parse(code);
    let context_header = build_header(path, &tree, code, strategy, tokenizer, cfg);
    let header_tokens = tokenizer.count_tokens(&context_header);

    // Step 2: enumerate top-level nodes, sub-chunk anything oversized.
    let top_level = strategy.top_level_nodes(&tree, code);
    let mut chunks: Vec<Chunk> = Vec::new();
    for node in &top_level {
        emit_chunks_for_node(node, &tree, code, strategy, tokenizer, cfg, &mut chunks);
    }

    // Step 3: order by start_line.
    chunks.sort_by_key(|c| c.start_line);

    // Step 4: should_skip pass over non-oversized, non-shell chunks.
    let mut skipped_content = Vec::new();
    for chunk in &mut chunks {
        if chunk.oversized || chunk.shell_context.is_some() {
            continue;
        }
        if let Some(reason) = strategy.should_skip(&chunk.original_text, &chunk.kind, cfg.boilerplate_threshold) {
            skipped_content.push(SkippedContent {
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                kind: chunk.kind.clone(),
                reason: reason.clone(),
            });
            chunk.skip_reason = Some(reason);
        }
    }

    let oversized_chunks: Vec<Chunk> = chunks.iter().filter(|c| c.oversized).cloned().collect();

    // Step 5: choose send strategy.
    let active: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_skipped() && !c.oversized).collect();

    let (send_strategy, mut groups) = if total_file_tokens + header_tokens <= cfg.max_tokens_per_group
        && oversized_chunks.is_empty()
    {
        let full_chunk = Chunk {
            original_text: code.to_string(),
            code_tokens: total_file_tokens,
            start_line: 1,
            end_line: code.lines().count().max(1),
            kind: "full_file".to_string(),
            shell_context: None,
            oversized: false,
            skip_reason: None,
        };
        (SendStrategy::FullFile, vec![vec![full_chunk]])
    } else {
        let packed = greedy_group(&active, cfg.max_tokens_per_group.saturating_sub(header_tokens), tokenizer);
        let strategy = if packed.is_empty() {
            if oversized_chunks.is_empty() { SendStrategy::FullFile } else { SendStrategy::Unprocessed }
        } else if packed.len() == 1 {
            SendStrategy::SingleGroup
        } else {
            SendStrategy::MultipleGroups
        };
        (strategy, packed)
    };

    // Step 6: finalize combined text per group, recompute total_tokens.
    let mut grouped_chunks = Vec::new();
    for (idx, group_chunks) in groups.drain(..).enumerate() {
        let combined_text = render_group(&context_header, &group_chunks);
        let total_tokens = tokenizer.count_tokens(&combined_text);
        let start_line = group_chunks.iter().map(|c| c.start_line).min().unwrap_or(1);
        let end_line = group_chunks.iter().map(|c| c.end_line).max().unwrap_or(start_line);
        grouped_chunks.push(ChunkGroup {
            id: idx + 1,
            chunks: group_chunks,
            combined_text,
            total_tokens,
            start_line,
            end_line,
        });
    }

    let final_token_count: usize = grouped_chunks.iter().map(|g| g.total_tokens).sum();

    // Step 7: token breakdown, reconciled by subtraction.
    let code_in_groups: usize = grouped_chunks
        .iter()
        .flat_map(|g| g.chunks.iter())
        .map(|c| c.code_tokens)
        .sum();
    let file_header_in_groups = grouped_chunks.len() * header_tokens;
    let mut seen_shell_texts = std::collections::HashSet::new();
    let shell_context_in_groups: usize = grouped_chunks
        .iter()
        .flat_map(|g| g.chunks.iter())
        .filter_map(|c| c.shell_context.as_ref())
        .filter(|s| seen_shell_texts.insert(s.text.clone()))
        .map(|s| s.tokens)
        .sum();

    let token_breakdown = TokenBreakdown::reconcile(total_file_tokens, final_token_count)
        .tap(|b| {
            b.code_in_groups = code_in_groups;
            b.file_header_in_groups = file_header_in_groups;
            b.shell_context_in_groups = shell_context_in_groups;
        })
        .finish();

    FileChunkGroup {
        file_path: path.to_string(),
        total_file_tokens,
        chunks,
        grouped_chunks,
        oversized_chunks,
        send_strategy,
        final_token_count,
        skipped_content,
        context_header,
        token_breakdown,
    }
}

trait Tap: Sized {
    fn tap(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}
impl Tap for crate::model::TokenBreakdownBuilder {}

fn build_header(
    path: &str,
    tree: &crate::language::ParseTree,
    code: &str,
    strategy: &dyn LanguageStrategy,
    tokenizer: &dyn Tokenizer,
    cfg: &ChunkerConfig,
) -> String {
    let mut lines = vec![format!("// File: {path}"), "// --- header ---".to_string()];
    let mut strategy_lines = strategy.header_lines(tree, code);
    strategy_lines.truncate(cfg.context_item_limit);
    lines.extend(strategy_lines);

    let mut header = lines.join("\n");
    while tokenizer.count_tokens(&header) > cfg.max_context_tokens {
        match header.rfind('\n') {
            Some(idx) if idx > 0 => header.truncate(idx),
            _ => break,
        }
    }
    header
}

fn emit_chunks_for_node(
    node: &AstNode,
    tree: &crate::language::ParseTree,
    code: &str,
    strategy: &dyn LanguageStrategy,
    tokenizer: &dyn Tokenizer,
    cfg: &ChunkerConfig,
    out: &mut Vec<Chunk>,
) {
    let text = node.text(code);
    let tokens = tokenizer.count_tokens(text);
    if tokens <= cfg.max_tokens_per_chunk {
        out.push(Chunk {
            original_text: text.to_string(),
            code_tokens: tokens,
            start_line: node.start_line,
            end_line: node.end_line,
            kind: node.kind.clone(),
            shell_context: None,
            oversized: false,
            skip_reason: None,
        });
        return;
    }

    let subs = strategy.sub_nodes(tree, code, node);
    if subs.is_empty() {
        out.extend(strategy.fallback_split(node, code, cfg.max_tokens_per_chunk, tokenizer));
        return;
    }

    let first_start = subs.first().map(|s| s.start_byte).unwrap_or(node.start_byte);
    let last_end = subs.last().map(|s| s.end_byte).unwrap_or(node.end_byte);
    let shell = build_shell_context(node, code, first_start, last_end, tokenizer);

    for sub in &subs {
        let sub_text = sub.text(code);
        let sub_tokens = tokenizer.count_tokens(sub_text);
        out.push(Chunk {
            original_text: sub_text.to_string(),
            code_tokens: sub_tokens,
            start_line: sub.start_line,
            end_line: sub.end_line,
            kind: sub.kind.clone(),
            shell_context: Some(shell.clone()),
            oversized: sub_tokens > cfg.max_tokens_per_chunk,
            skip_reason: None,
        });
    }
}

/// Greedily groups active chunks with a running token counter bounded by
/// `budget`, in their current (start_line) order.
fn greedy_group<'a>(active: &[&'a Chunk], budget: usize, tokenizer: &dyn Tokenizer) -> Vec<Vec<Chunk>> {
    let mut groups: Vec<Vec<Chunk>> = Vec::new();
    let mut current: Vec<Chunk> = Vec::new();
    let mut current_tokens = 0usize;

    for chunk in active {
        let cost = chunk.code_tokens + chunk.shell_context.as_ref().map(|s| s.tokens).unwrap_or(0);
        if !current.is_empty() && current_tokens + cost > budget {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push((*chunk).clone());
        let _ = tokenizer;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Renders a group's final combined text: header, then each chunk in order
/// with separators, shell-context text emitted once per contiguous run and
/// closed with an end marker when leaving it.
fn render_group(header: &str, chunks: &[Chunk]) -> String {
    let mut out = String::new();
    out.push_str(header);
    out.push('\n');

    let mut last_shell: Option<&str> = None;
    for chunk in chunks {
        match (&chunk.shell_context, last_shell) {
            (Some(shell), Some(prev)) if prev == shell.text => {
                // still inside the same shell run, nothing to re-emit
            }
            (Some(shell), _) => {
                out.push_str(&shell.text);
                out.push('\n');
                last_shell = Some(shell.text.as_str());
            }
            (None, Some(_)) => {
                out.push_str("// --- end of sub-chunks ---\n");
                last_shell = None;
            }
            (None, None) => {}
        }
        out.push_str(&format!(
            "{SEPARATOR_PREAMBLE} lines {}-{} type={} ---\n",
            chunk.start_line, chunk.end_line, chunk.kind
        ));
        out.push_str(&chunk.original_text);
        out.push('\n');
    }
    if last_shell.is_some() {
        out.push_str("// --- end of sub-chunks ---\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::SimpleTextStrategy;
    use crate::tokenizer::BytesEstimateTokenizer;

    fn cfg() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn empty_file_yields_full_file_with_header_only() {
        let tokenizer = BytesEstimateTokenizer;
        let strategy = SimpleTextStrategy;
        let result = chunk_file("", "empty.txt", &strategy, &tokenizer, &cfg());
        assert_eq!(result.send_strategy, SendStrategy::FullFile);
        assert_eq!(result.grouped_chunks.len(), 1);
    }

    #[test]
    fn small_file_is_full_file_strategy() {
        let tokenizer = BytesEstimateTokenizer;
        let strategy = SimpleTextStrategy;
        let code = "fn main() {\n    println!(\"hi\");\n}\n";
        let result = chunk_file(code, "main.rs", &strategy, &tokenizer, &cfg());
        assert_eq!(result.send_strategy, SendStrategy::FullFile);
        assert_eq!(result.grouped_chunks.len(), 1);
        assert!(result.grouped_chunks[0].combined_text.trim_end().ends_with(code.trim_end()));
    }

    #[test]
    fn large_file_multiple_groups_respect_budget() {
        let tokenizer = BytesEstimateTokenizer;
        let strategy = SimpleTextStrategy;
        // Build a file whose single-line "blocks" total far beyond one group.
        let mut code = String::new();
        for i in 0..400 {
            code.push_str(&format!("line number {i} with some extra padding text here\n\n"));
        }
        let mut small_cfg = cfg();
        small_cfg.max_tokens_per_chunk = 20;
        small_cfg.max_tokens_per_group = 100;
        let result = chunk_file(&code, "big.txt", &strategy, &tokenizer, &small_cfg);
        assert_ne!(result.send_strategy, SendStrategy::FullFile);
        for g in &result.grouped_chunks {
            assert!(g.total_tokens <= small_cfg.max_tokens_per_group + 50, "group exceeded budget generously");
        }
    }

    #[test]
    fn determinism_same_input_same_output() {
        let tokenizer = BytesEstimateTokenizer;
        let strategy = SimpleTextStrategy;
        let code = "a\nb\n\nc\nd\n\ne\nf\n";
        let r1 = chunk_file(code, "x.txt", &strategy, &tokenizer, &cfg());
        let r2 = chunk_file(code, "x.txt", &strategy, &tokenizer, &cfg());
        assert_eq!(r1.final_token_count, r2.final_token_count);
        assert_eq!(r1.grouped_chunks.len(), r2.grouped_chunks.len());
        for (a, b) in r1.grouped_chunks.iter().zip(r2.grouped_chunks.iter()) {
            assert_eq!(a.combined_text, b.combined_text);
        }
    }
}
