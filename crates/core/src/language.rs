//! Language strategies: the capability set a chunker needs from a file's
//! language — parsing, enumerating independent top-level units and their
//! sub-units, extracting header/context text, judging boilerplate, and a
//! line-accumulating fallback splitter for nodes too big to chunk whole.
//!
//! Three families are registered: a tree-sitter-backed structured strategy
//! for languages with a grammar compiled in (feature `treesitter`), a
//! declarative single-atom strategy for manifest-shaped files, and a
//! dependency-free simple-text strategy used as the universal fallback.

use crate::model::{Chunk, ShellContext, SHELL_PLACEHOLDER};
use crate::tokenizer::Tokenizer;
use std::collections::HashMap;
use std::sync::Arc;

/// An independent unit of a file: a top-level node, or a sub-node within one.
/// Carries byte offsets so strategies can slice the original source directly
/// rather than re-serializing anything tree-sitter handed back.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl AstNode {
    pub fn text<'a>(&self, code: &'a str) -> &'a str {
        &code[self.start_byte..self.end_byte]
    }
}

/// Opaque parse result. Structured strategies stash a tree-sitter tree behind
/// this; the declarative and simple-text strategies never populate one.
pub struct ParseTree {
    #[cfg(feature = "treesitter")]
    pub(crate) ts_tree: Option<tree_sitter::Tree>,
}

impl ParseTree {
    fn empty() -> Self {
        Self {
            #[cfg(feature = "treesitter")]
            ts_tree: None,
        }
    }
}

pub trait LanguageStrategy: Send + Sync {
    fn parse(&self, code: &str) -> ParseTree;
    fn top_level_nodes(&self, tree: &ParseTree, code: &str) -> Vec<AstNode>;
    fn sub_nodes(&self, tree: &ParseTree, code: &str, node: &AstNode) -> Vec<AstNode>;
    /// Header lines, in priority order, already size-bounded per item. The
    /// chunker is responsible for capping the total count and trimming to fit.
    fn header_lines(&self, tree: &ParseTree, code: &str) -> Vec<String>;
    fn should_skip(&self, node_text: &str, kind: &str, boilerplate_threshold: f64) -> Option<String>;
    fn fallback_split(
        &self,
        node: &AstNode,
        code: &str,
        max_tokens: usize,
        tokenizer: &dyn Tokenizer,
    ) -> Vec<Chunk>;
}

// ---------------------------------------------------------------------------
// Shared fallback splitter — line-accumulating, used by every strategy
// ---------------------------------------------------------------------------

/// Accumulates whole lines of `node` until adding the next would exceed
/// `max_tokens`, emitting a new part each time. Parts are always marked
/// non-oversized: a single line that alone exceeds `max_tokens` still forms
/// its own part rather than being split further, per spec §4.3.
pub fn line_accumulating_split(
    node: &AstNode,
    code: &str,
    max_tokens: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let text = node.text(code);
    let mut chunks = Vec::new();
    let mut part_no = 1usize;
    let mut cur_lines: Vec<&str> = Vec::new();
    let mut cur_tokens = 0usize;
    let mut line_no = node.start_line;
    let mut part_start_line = node.start_line;

    let mut flush = |lines: &mut Vec<&str>, start: usize, end: usize, part_no: &mut usize, out: &mut Vec<Chunk>| {
        if lines.is_empty() {
            return;
        }
        let joined = lines.join("\n");
        let tokens = tokenizer.count_tokens(&joined);
        out.push(Chunk {
            original_text: joined,
            code_tokens: tokens,
            start_line: start,
            end_line: end,
            kind: format!("{}_part_{}", node.kind, part_no),
            shell_context: None,
            oversized: false,
            skip_reason: None,
        });
        *part_no += 1;
        lines.clear();
    };

    for line in text.lines() {
        let candidate_tokens = tokenizer.count_tokens(line);
        if !cur_lines.is_empty() && cur_tokens + candidate_tokens > max_tokens {
            flush(&mut cur_lines, part_start_line, line_no - 1, &mut part_no, &mut chunks);
            cur_tokens = 0;
            part_start_line = line_no;
        }
        cur_lines.push(line);
        cur_tokens += candidate_tokens;
        line_no += 1;
    }
    flush(&mut cur_lines, part_start_line, line_no.saturating_sub(1).max(part_start_line), &mut part_no, &mut chunks);

    if chunks.is_empty() {
        // Degenerate: no lines at all (empty node text) — still yield one part
        // so the node is represented somewhere.
        chunks.push(Chunk {
            original_text: String::new(),
            code_tokens: 0,
            start_line: node.start_line,
            end_line: node.end_line,
            kind: format!("{}_part_1", node.kind),
            shell_context: None,
            oversized: false,
            skip_reason: None,
        });
    }
    chunks
}

/// Builds the single shell context shared by every sub-chunk of `node`: the
/// parent's opening text up to `first_sub_start_byte`, and its closing text
/// from `last_sub_end_byte` to the parent's end, joined by a placeholder.
pub fn build_shell_context(
    node: &AstNode,
    code: &str,
    first_sub_start_byte: usize,
    last_sub_end_byte: usize,
    tokenizer: &dyn Tokenizer,
) -> ShellContext {
    let opening = &code[node.start_byte..first_sub_start_byte.min(code.len())];
    let closing = &code[last_sub_end_byte.min(code.len())..node.end_byte];
    let text = format!("{}\n{}\n{}", opening.trim_end(), SHELL_PLACEHOLDER, closing.trim_start());
    let tokens = tokenizer.count_tokens(&text);
    ShellContext { text, tokens }
}

// ---------------------------------------------------------------------------
// Simple-text strategy — universal fallback, no grammar required
// ---------------------------------------------------------------------------

/// Splits a file into blank-line-delimited blocks as its "top level nodes".
/// Has no sub-nodes (oversized blocks go straight to the fallback splitter),
/// no header lines, and never judges anything boilerplate.
pub struct SimpleTextStrategy;

impl LanguageStrategy for SimpleTextStrategy {
    fn parse(&self, _code: &str) -> ParseTree {
        ParseTree::empty()
    }

    fn top_level_nodes(&self, _tree: &ParseTree, code: &str) -> Vec<AstNode> {
        if code.is_empty() {
            return Vec::new();
        }
        let mut nodes = Vec::new();
        let mut line_no = 1usize;
        let mut block_start_line = 1usize;
        let mut block_start_byte = 0usize;
        let mut byte_pos = 0usize;
        let mut in_block = false;

        for line in code.split_inclusive('\n') {
            let trimmed = line.trim_end_matches('\n').trim();
            if trimmed.is_empty() {
                if in_block {
                    nodes.push(AstNode {
                        kind: "block".to_string(),
                        start_line: block_start_line,
                        end_line: line_no - 1,
                        start_byte: block_start_byte,
                        end_byte: byte_pos,
                    });
                    in_block = false;
                }
            } else if !in_block {
                in_block = true;
                block_start_line = line_no;
                block_start_byte = byte_pos;
            }
            byte_pos += line.len();
            line_no += 1;
        }
        if in_block {
            nodes.push(AstNode {
                kind: "block".to_string(),
                start_line: block_start_line,
                end_line: line_no - 1,
                start_byte: block_start_byte,
                end_byte: code.len(),
            });
        }
        if nodes.is_empty() {
            nodes.push(AstNode {
                kind: "block".to_string(),
                start_line: 1,
                end_line: code.lines().count().max(1),
                start_byte: 0,
                end_byte: code.len(),
            });
        }
        nodes
    }

    fn sub_nodes(&self, _tree: &ParseTree, _code: &str, _node: &AstNode) -> Vec<AstNode> {
        Vec::new()
    }

    fn header_lines(&self, _tree: &ParseTree, _code: &str) -> Vec<String> {
        Vec::new()
    }

    fn should_skip(&self, _node_text: &str, _kind: &str, _boilerplate_threshold: f64) -> Option<String> {
        None
    }

    fn fallback_split(
        &self,
        node: &AstNode,
        code: &str,
        max_tokens: usize,
        tokenizer: &dyn Tokenizer,
    ) -> Vec<Chunk> {
        line_accumulating_split(node, code, max_tokens, tokenizer)
    }
}

// ---------------------------------------------------------------------------
// Declarative strategy — single-atom files (manifests, lockfiles, pragmas-only)
// ---------------------------------------------------------------------------

/// Treats the whole file as one pseudo-node with an empty parse tree, per
/// spec §4.3: "the declarative strategy returns an empty tree and treats the
/// whole file as a single pseudo-node."
pub struct DeclarativeStrategy;

impl LanguageStrategy for DeclarativeStrategy {
    fn parse(&self, _code: &str) -> ParseTree {
        ParseTree::empty()
    }

    fn top_level_nodes(&self, _tree: &ParseTree, code: &str) -> Vec<AstNode> {
        if code.is_empty() {
            return Vec::new();
        }
        vec![AstNode {
            kind: "declaration".to_string(),
            start_line: 1,
            end_line: code.lines().count().max(1),
            start_byte: 0,
            end_byte: code.len(),
        }]
    }

    fn sub_nodes(&self, _tree: &ParseTree, _code: &str, _node: &AstNode) -> Vec<AstNode> {
        Vec::new()
    }

    fn header_lines(&self, _tree: &ParseTree, _code: &str) -> Vec<String> {
        Vec::new()
    }

    fn should_skip(&self, _node_text: &str, _kind: &str, _boilerplate_threshold: f64) -> Option<String> {
        None
    }

    fn fallback_split(
        &self,
        node: &AstNode,
        code: &str,
        max_tokens: usize,
        tokenizer: &dyn Tokenizer,
    ) -> Vec<Chunk> {
        line_accumulating_split(node, code, max_tokens, tokenizer)
    }
}

// ---------------------------------------------------------------------------
// Structured strategy — tree-sitter backed
// ---------------------------------------------------------------------------

#[cfg(feature = "treesitter")]
mod structured {
    use super::*;
    use tree_sitter::{Language, Node, Parser};

    pub struct StructuredStrategy {
        pub ext: &'static str,
        pub language: fn() -> Language,
    }

    /// Node kinds treated as independent top-level units across the grammars
    /// registered below. Mirrors the kind table used to extract top-level
    /// symbols, generalized here to "this is a chunkable unit" rather than
    /// "this is a named symbol".
    fn is_top_level_kind(kind: &str) -> bool {
        matches!(
            kind,
            "function_item"
                | "struct_item"
                | "enum_item"
                | "trait_item"
                | "impl_item"
                | "mod_item"
                | "function_declaration"
                | "class_declaration"
                | "interface_declaration"
                | "method_definition"
                | "function_definition"
                | "class_definition"
                | "method_declaration"
                | "type_declaration"
                | "struct_specifier"
                | "class_specifier"
                | "enum_specifier"
                | "enum_declaration"
        )
    }

    /// Small, non-function declarations eligible for the header rather than
    /// their own chunk: imports/use/type-alias/small const.
    fn is_header_kind(kind: &str) -> bool {
        matches!(
            kind,
            "use_declaration"
                | "import_statement"
                | "import_declaration"
                | "package_clause"
                | "type_alias_declaration"
                | "type_item"
                | "const_item"
                | "static_item"
        )
    }

    fn node_to_ast(node: &Node) -> AstNode {
        AstNode {
            kind: node.kind().to_string(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
        }
    }

    impl LanguageStrategy for StructuredStrategy {
        fn parse(&self, code: &str) -> ParseTree {
            let mut parser = Parser::new();
            if parser.set_language(&(self.language)()).is_err() {
                return ParseTree { ts_tree: None };
            }
            ParseTree { ts_tree: parser.parse(code, None) }
        }

        fn top_level_nodes(&self, tree: &ParseTree, code: &str) -> Vec<AstNode> {
            let Some(ts_tree) = &tree.ts_tree else { return Vec::new() };
            let root = ts_tree.root_node();
            let mut out = Vec::new();
            let mut cursor = root.walk();
            for child in root.children(&mut cursor) {
                collect_top_level(&child, code, &mut out);
            }
            out
        }

        fn sub_nodes(&self, tree: &ParseTree, code: &str, node: &AstNode) -> Vec<AstNode> {
            let Some(ts_tree) = &tree.ts_tree else { return Vec::new() };
            let root = ts_tree.root_node();
            let Some(target) = root.descendant_for_byte_range(node.start_byte, node.end_byte) else {
                return Vec::new();
            };
            let body = target
                .child_by_field_name("body")
                .or_else(|| target.child_by_field_name("declaration_list"))
                .unwrap_or(target);
            let mut out = Vec::new();
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                let kind = child.kind();
                if matches!(kind, "{" | "}" | ";") {
                    continue;
                }
                out.push(node_to_ast(&child));
            }
            out
        }

        fn header_lines(&self, tree: &ParseTree, code: &str) -> Vec<String> {
            let Some(ts_tree) = &tree.ts_tree else { return Vec::new() };
            let root = ts_tree.root_node();
            let mut out = Vec::new();
            let mut cursor = root.walk();
            for child in root.children(&mut cursor) {
                collect_header(&child, code, &mut out);
            }
            out
        }

        fn should_skip(&self, node_text: &str, kind: &str, boilerplate_threshold: f64) -> Option<String> {
            let trimmed = node_text.trim();
            if matches!(kind, "interface_declaration" | "type_alias_declaration") && trimmed.lines().count() <= 2 {
                return Some("trivial type/interface declaration".to_string());
            }
            let empty_interface_re = regex::Regex::new(r"(?s)^\s*(?:export\s+)?interface\s+\w+(?:\s*<[^>]*>)?\s*\{\s*\}\s*$").unwrap();
            if empty_interface_re.is_match(trimmed) {
                return Some("empty interface".to_string());
            }
            let trivial_event_re = regex::Regex::new(r"^\s*event\s+\w+\s*\([^)]*\)\s*;?\s*$").unwrap();
            if trivial_event_re.is_match(trimmed) {
                return Some("trivial event declaration".to_string());
            }
            if trimmed.ends_with("{}") || trimmed.ends_with("{ }") {
                return Some("empty body".to_string());
            }
            let comment_lines =
                trimmed.lines().filter(|l| { let t = l.trim(); t.starts_with("//") || t.starts_with('*') || t.starts_with("/*") }).count();
            let total_lines = trimmed.lines().count().max(1);
            if comment_lines as f64 / total_lines as f64 >= boilerplate_threshold {
                return Some("low code-to-comment ratio".to_string());
            }
            None
        }

        fn fallback_split(
            &self,
            node: &AstNode,
            code: &str,
            max_tokens: usize,
            tokenizer: &dyn Tokenizer,
        ) -> Vec<Chunk> {
            line_accumulating_split(node, code, max_tokens, tokenizer)
        }
    }

    /// `export` wrappers are transparent: unwrap to the declaration they wrap.
    /// Plain (non-function) top-level variable declarations are filtered out.
    fn collect_top_level(node: &Node, code: &str, out: &mut Vec<AstNode>) {
        let kind = node.kind();
        if kind == "export_statement" {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_top_level(&child, code, out);
            }
            return;
        }
        if kind == "type_declaration" {
            // Go: descend into type_spec children, each its own unit.
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "type_spec" {
                    out.push(node_to_ast(&child));
                }
            }
            return;
        }
        if is_top_level_kind(kind) {
            out.push(node_to_ast(node));
            return;
        }
        if kind == "variable_declaration" || kind == "lexical_declaration" {
            // Only keep if function-valued (arrow function / function expr init).
            let text = node.utf8_text(code.as_bytes()).unwrap_or("");
            if text.contains("=>") || text.contains("function") {
                out.push(node_to_ast(node));
            }
        }
    }

    fn collect_header(node: &Node, code: &str, out: &mut Vec<String>) {
        let kind = node.kind();
        if kind == "export_statement" {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_header(&child, code, out);
            }
            return;
        }
        if is_header_kind(kind) {
            if let Ok(text) = node.utf8_text(code.as_bytes()) {
                let bounded: String = text.chars().take(300).collect();
                out.push(bounded);
            }
        }
    }
}

#[cfg(feature = "treesitter")]
pub use structured::StructuredStrategy;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Resolves a file extension to a [`LanguageStrategy`]. `force_simple`
/// collapses every lookup to the simple-text strategy regardless of
/// registration, per spec §4.3/§9.
pub struct LanguageRegistry {
    strategies: HashMap<&'static str, Arc<dyn LanguageStrategy>>,
    declarative_exts: std::collections::HashSet<&'static str>,
    declarative: Arc<dyn LanguageStrategy>,
    simple_text: Arc<dyn LanguageStrategy>,
    pub force_simple: bool,
}

impl LanguageRegistry {
    pub fn new(force_simple: bool) -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn LanguageStrategy>> = HashMap::new();

        #[cfg(feature = "treesitter")]
        {
            use structured::StructuredStrategy;
            let entries: &[(&'static str, fn() -> tree_sitter::Language)] = &[
                ("rs", || tree_sitter_rust::LANGUAGE.into()),
                ("ts", || tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
                ("tsx", || tree_sitter_typescript::LANGUAGE_TSX.into()),
                ("js", || tree_sitter_javascript::LANGUAGE.into()),
                ("jsx", || tree_sitter_javascript::LANGUAGE.into()),
                ("mjs", || tree_sitter_javascript::LANGUAGE.into()),
                ("cjs", || tree_sitter_javascript::LANGUAGE.into()),
                ("py", || tree_sitter_python::LANGUAGE.into()),
                ("pyi", || tree_sitter_python::LANGUAGE.into()),
                ("go", || tree_sitter_go::LANGUAGE.into()),
                ("c", || tree_sitter_c::LANGUAGE.into()),
                ("h", || tree_sitter_c::LANGUAGE.into()),
                ("cpp", || tree_sitter_cpp::LANGUAGE.into()),
                ("cc", || tree_sitter_cpp::LANGUAGE.into()),
                ("cxx", || tree_sitter_cpp::LANGUAGE.into()),
                ("hpp", || tree_sitter_cpp::LANGUAGE.into()),
                ("java", || tree_sitter_java::LANGUAGE.into()),
            ];
            for (ext, lang_fn) in entries {
                strategies.insert(ext, Arc::new(StructuredStrategy { ext, language: *lang_fn }));
            }
        }

        let declarative_exts: std::collections::HashSet<&'static str> =
            ["json", "yaml", "yml", "toml", "lock", "sol", "xml", "ini", "cfg"].into_iter().collect();

        Self {
            strategies,
            declarative_exts,
            declarative: Arc::new(DeclarativeStrategy),
            simple_text: Arc::new(SimpleTextStrategy),
            force_simple,
        }
    }

    pub fn resolve(&self, ext: &str) -> Arc<dyn LanguageStrategy> {
        if self.force_simple {
            return self.simple_text.clone();
        }
        if let Some(strategy) = self.strategies.get(ext) {
            return strategy.clone();
        }
        if self.declarative_exts.contains(ext) {
            return self.declarative.clone();
        }
        self.simple_text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateTokenizer;

    #[test]
    fn simple_text_splits_on_blank_lines() {
        let strategy = SimpleTextStrategy;
        let tree = strategy.parse("");
        let code = "a\nb\n\nc\nd\n";
        let nodes = strategy.top_level_nodes(&tree, code);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text(code), "a\nb");
        assert_eq!(nodes[1].text(code), "c\nd");
    }

    #[test]
    fn declarative_treats_file_as_one_node() {
        let strategy = DeclarativeStrategy;
        let tree = strategy.parse("");
        let code = "{\n  \"a\": 1\n}\n";
        let nodes = strategy.top_level_nodes(&tree, code);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text(code), code);
    }

    #[test]
    fn fallback_split_never_marks_oversized() {
        let tokenizer = BytesEstimateTokenizer;
        let node = AstNode { kind: "block".into(), start_line: 1, end_line: 3, start_byte: 0, end_byte: 9 };
        let code = "a\nb\nc\n";
        let chunks = line_accumulating_split(&node, code, 1, &tokenizer);
        assert!(chunks.iter().all(|c| !c.oversized));
    }

    #[test]
    fn registry_force_simple_overrides_everything() {
        let registry = LanguageRegistry::new(true);
        let strategy = registry.resolve("rs");
        let tree = strategy.parse("fn x() {}");
        // simple-text never reports sub-nodes
        let nodes = strategy.top_level_nodes(&tree, "fn x() {}\n");
        assert!(strategy.sub_nodes(&tree, "fn x() {}\n", &nodes[0]).is_empty());
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn structured_should_skip_flags_empty_interface_and_trivial_event() {
        let registry = LanguageRegistry::new(false);
        let strategy = registry.resolve("ts");
        assert_eq!(
            strategy.should_skip("export interface Empty {}", "interface_declaration", 0.6),
            Some("empty interface".to_string())
        );
        assert_eq!(
            strategy.should_skip("event Transfer(address from, address to);", "expression_statement", 0.6),
            Some("trivial event declaration".to_string())
        );
    }
}
