//! Line chunker: greedy line accumulation until adding the next line would
//! exceed `maxChunkSize - margin`, then emit the chunk and continue. Uses
//! the pluggable [`TokenCounter`] contract instead of a fixed char budget.

use super::ChunkDraft;
use crate::model::ChunkKind;
use crate::util::TokenCounter;

const MARGIN_TOKENS: usize = 16;

pub fn chunk_lines(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> Vec<ChunkDraft> {
    let budget = max_tokens.saturating_sub(MARGIN_TOKENS).max(1);
    let mut drafts = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut start_line = 1usize;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let candidate = if buf.is_empty() {
            line.to_string()
        } else {
            format!("{}\n{}", buf.join("\n"), line)
        };
        if !buf.is_empty() && counter.count(&candidate) > budget {
            flush(&mut drafts, &buf, start_line, line_no - 1);
            buf.clear();
            start_line = line_no;
        }
        buf.push(line);
    }
    if !buf.is_empty() {
        let end_line = start_line + buf.len() - 1;
        flush(&mut drafts, &buf, start_line, end_line);
    }
    if drafts.is_empty() {
        drafts.push(ChunkDraft {
            kind: ChunkKind::Text,
            start_line: 1,
            end_line: 1,
            content: String::new(),
            heading_path: Vec::new(),
            symbol: None,
        });
    }
    drafts
}

fn flush(drafts: &mut Vec<ChunkDraft>, buf: &[&str], start_line: usize, end_line: usize) {
    if buf.is_empty() {
        return;
    }
    drafts.push(ChunkDraft {
        kind: ChunkKind::Text,
        start_line,
        end_line,
        content: buf.join("\n"),
        heading_path: Vec::new(),
        symbol: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::HeuristicTokenCounter;

    #[test]
    fn accumulates_until_budget_exceeded() {
        let text = "a\n".repeat(200);
        let drafts = chunk_lines(&text, 20, &HeuristicTokenCounter);
        assert!(drafts.len() > 1);
        for d in &drafts {
            assert!(d.start_line <= d.end_line);
        }
    }

    #[test]
    fn single_small_file_yields_one_chunk() {
        let drafts = chunk_lines("hello\nworld\n", 4000, &HeuristicTokenCounter);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].start_line, 1);
    }
}
