//! Structural (tree-sitter) chunker.
//!
//! Whole file first: if it fits the budget, emit it as a single chunk. If
//! not, walk top-level named nodes (functions, types, impls, classes...)
//! and collapse each node's body to a sentinel when the node alone still
//! exceeds the budget, recursing into its children instead. A parse failure
//! returns [`ChunkOutcome::Fallback`], handing control back to the line
//! chunker at parse time rather than forcing the choice at build time.

use super::ChunkDraft;
use crate::model::{ChunkKind, ChunkOutcome};
use crate::util::TokenCounter;

const COLLAPSED_BODY_SENTINEL: &str = "/* ... */";

#[cfg(feature = "treesitter")]
fn select_language(path: &str) -> Option<tree_sitter::Language> {
    let ext = path.rsplit('/').next().unwrap_or(path).rsplit_once('.').map(|(_, e)| e)?;
    let lang = match ext {
        "rs" => tree_sitter_rust::language(),
        "js" | "jsx" | "mjs" | "cjs" => tree_sitter_javascript::language(),
        "ts" => tree_sitter_typescript::language_typescript(),
        "tsx" => tree_sitter_typescript::language_tsx(),
        "py" => tree_sitter_python::language(),
        "go" => tree_sitter_go::language(),
        "java" => tree_sitter_java::language(),
        "c" | "h" => tree_sitter_c::language(),
        "cpp" | "cc" | "cxx" | "hpp" => tree_sitter_cpp::language(),
        "cs" => tree_sitter_c_sharp::language(),
        _ => return None,
    };
    Some(lang)
}

/// Named node kinds across the supported grammars that represent a
/// top-level definition worth chunking around on its own.
fn is_definition_node(kind: &str) -> bool {
    matches!(
        kind,
        "function_item"
            | "impl_item"
            | "struct_item"
            | "enum_item"
            | "trait_item"
            | "mod_item"
            | "function_declaration"
            | "method_definition"
            | "class_declaration"
            | "class_body"
            | "interface_declaration"
            | "function_definition"
            | "class_definition"
            | "method_declaration"
            | "class_specifier"
            | "namespace_definition"
    )
}

#[cfg(feature = "treesitter")]
pub fn chunk_structural(path: &str, text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> ChunkOutcome {
    if counter.count(text) <= max_tokens {
        return ChunkOutcome::Ok(vec![whole_file_draft(text)]);
    }

    let Some(language) = select_language(path) else {
        return ChunkOutcome::Fallback;
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(language).is_err() {
        return ChunkOutcome::Fallback;
    }
    let Some(tree) = parser.parse(text, None) else {
        return ChunkOutcome::Fallback;
    };
    if tree.root_node().has_error() {
        return ChunkOutcome::Fallback;
    }

    let mut drafts = Vec::new();
    let lines: Vec<&str> = text.lines().collect();
    collect_nodes(tree.root_node(), text.as_bytes(), &lines, max_tokens, counter, &mut drafts);
    if drafts.is_empty() {
        return ChunkOutcome::Fallback;
    }
    ChunkOutcome::Ok(drafts)
}

#[cfg(feature = "treesitter")]
fn collect_nodes(
    node: tree_sitter::Node,
    source: &[u8],
    lines: &[&str],
    max_tokens: usize,
    counter: &dyn TokenCounter,
    out: &mut Vec<ChunkDraft>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if !is_definition_node(child.kind()) {
            if child.child_count() > 0 {
                collect_nodes(child, source, lines, max_tokens, counter, out);
            }
            continue;
        }

        let start_line = child.start_position().row + 1;
        let end_line = child.end_position().row + 1;
        let content = slice_lines(lines, start_line, end_line);
        let symbol = node_name(child, source);

        if counter.count(&content) <= max_tokens {
            out.push(ChunkDraft {
                kind: ChunkKind::Structural,
                start_line,
                end_line,
                content,
                heading_path: Vec::new(),
                symbol,
            });
        } else if child.child_count() > 0 {
            // Recurse into children instead of emitting the oversized node
            // whole; a too-large leaf gets a collapsed-body sentinel instead.
            collect_nodes(child, source, lines, max_tokens, counter, out);
        } else {
            out.push(ChunkDraft {
                kind: ChunkKind::Structural,
                start_line,
                end_line,
                content: format!("{}\n{}", header_line(lines, start_line), COLLAPSED_BODY_SENTINEL),
                heading_path: Vec::new(),
                symbol,
            });
        }
    }
}

#[cfg(feature = "treesitter")]
fn node_name(node: tree_sitter::Node, source: &[u8]) -> Option<String> {
    node.child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok().map(|s| s.to_string()))
}

fn whole_file_draft(text: &str) -> ChunkDraft {
    let end_line = text.lines().count().max(1);
    ChunkDraft {
        kind: ChunkKind::Structural,
        start_line: 1,
        end_line,
        content: text.to_string(),
        heading_path: Vec::new(),
        symbol: None,
    }
}

fn slice_lines(lines: &[&str], start_line: usize, end_line: usize) -> String {
    let start = start_line.saturating_sub(1).min(lines.len());
    let end = end_line.min(lines.len());
    lines[start..end].join("\n")
}

fn header_line(lines: &[&str], start_line: usize) -> &str {
    lines.get(start_line.saturating_sub(1)).copied().unwrap_or("")
}

#[cfg(not(feature = "treesitter"))]
pub fn chunk_structural(_path: &str, _text: &str, _max_tokens: usize, _counter: &dyn TokenCounter) -> ChunkOutcome {
    ChunkOutcome::Fallback
}

#[cfg(all(test, feature = "treesitter"))]
mod tests {
    use super::*;
    use crate::util::HeuristicTokenCounter;

    #[test]
    fn whole_file_under_budget_is_single_chunk() {
        let src = "fn main() {\n    println!(\"hi\");\n}\n";
        match chunk_structural("main.rs", src, 4000, &HeuristicTokenCounter) {
            ChunkOutcome::Ok(drafts) => assert_eq!(drafts.len(), 1),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn splits_by_top_level_item_when_over_budget() {
        let src = format!(
            "fn a() {{\n{}\n}}\nfn b() {{\n{}\n}}\n",
            "let x = 1;\n".repeat(100),
            "let y = 2;\n".repeat(100)
        );
        match chunk_structural("lib.rs", &src, 50, &HeuristicTokenCounter) {
            ChunkOutcome::Ok(drafts) => assert!(drafts.len() >= 2),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_extension_falls_back() {
        match chunk_structural("data.xyz", "whatever", 4000, &HeuristicTokenCounter) {
            ChunkOutcome::Fallback => {}
            other => panic!("expected Fallback, got {other:?}"),
        }
    }
}
