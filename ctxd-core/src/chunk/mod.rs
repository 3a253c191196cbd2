//! Chunker. Three-way dispatch: recognized source-language extensions go
//! through the structural (tree-sitter) chunker with a fallback to the line
//! chunker; `.md`/`.markdown` go through the recursive markdown chunker;
//! everything else goes straight to the line chunker.

mod line;
mod markdown;
mod slug;
mod structural;

use crate::model::{Chunk, ChunkKind, ChunkOutcome, IngestOptions};
use crate::util::TokenCounter;

/// An in-progress chunk before digest/slug/token-estimate are filled in.
#[derive(Debug, Clone)]
pub(crate) struct ChunkDraft {
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub heading_path: Vec<String>,
    pub symbol: Option<String>,
}

const STRUCTURAL_EXTENSIONS: &[&str] = &[
    "rs", "js", "jsx", "mjs", "cjs", "ts", "tsx", "py", "go", "java", "c", "h", "cpp", "cc", "cxx",
    "hpp", "cs",
];

fn is_markdown(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".md") || lower.ends_with(".markdown")
}

fn extension(path: &str) -> Option<&str> {
    path.rsplit('/').next().unwrap_or(path).rsplit_once('.').map(|(_, ext)| ext)
}

/// Chunk one file's text. `digest` is the file's `cacheKey`; it is
/// propagated onto every resulting [`Chunk`] unchanged.
pub fn chunk_file(
    path: &str,
    text: &str,
    digest: &str,
    options: &IngestOptions,
    counter: &dyn TokenCounter,
) -> ChunkOutcome {
    let budget = options.chunk_max_chars;

    let drafts = if is_markdown(path) {
        markdown::chunk_markdown(text, budget, counter)
    } else if extension(path).map(|ext| STRUCTURAL_EXTENSIONS.contains(&ext)).unwrap_or(false) {
        match structural::chunk_structural(path, text, budget, counter) {
            ChunkOutcome::Ok(drafts) => drafts,
            ChunkOutcome::Fallback => line::chunk_lines(text, budget, counter),
            fatal @ ChunkOutcome::Fatal(_) => return fatal,
        }
    } else {
        line::chunk_lines(text, budget, counter)
    };

    ChunkOutcome::Ok(finalize_chunks(path, digest, drafts, counter))
}

/// Converts drafts into [`Chunk`]s: fills in digest (unchanged per-file),
/// 0-based contiguous indices, token estimate and slug.
fn finalize_chunks(
    path: &str,
    digest: &str,
    drafts: Vec<ChunkDraft>,
    counter: &dyn TokenCounter,
) -> Vec<Chunk> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let slug = slug::make_slug(
                path,
                draft.kind,
                &draft.heading_path,
                &draft.symbol,
                draft.start_line,
                draft.end_line,
            );
            Chunk {
                digest: digest.to_string(),
                index,
                filepath: path.to_string(),
                kind: draft.kind,
                start_line: draft.start_line,
                end_line: draft.end_line,
                token_estimate: counter.count(&draft.content),
                content: draft.content,
                heading_path: draft.heading_path,
                symbol: draft.symbol,
                slug,
            }
        })
        .collect()
}
