//! Markdown chunker: recursively splits by header level (h1..h6). At each
//! level, every section carries its header as metadata, recursion subtracts
//! the header's token cost from the remaining budget, and beyond depth 6 it
//! delegates to the line chunker.

use super::line::chunk_lines;
use super::ChunkDraft;
use crate::model::ChunkKind;
use crate::util::TokenCounter;
use regex::Regex;

struct Section<'a> {
    heading: Option<&'a str>,
    body_lines: Vec<(usize, &'a str)>, // (1-based line number, text)
}

pub fn chunk_markdown(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> Vec<ChunkDraft> {
    let lines: Vec<(usize, &str)> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let mut drafts = Vec::new();
    split_recursive(&lines, 1, Vec::new(), max_tokens, counter, &mut drafts);
    if drafts.is_empty() {
        drafts.push(ChunkDraft {
            kind: ChunkKind::Markdown,
            start_line: 1,
            end_line: 1,
            content: String::new(),
            heading_path: Vec::new(),
            symbol: None,
        });
    }
    drafts
}

fn heading_re() -> Regex {
    Regex::new(r"^(#{1,6})\s+(.+)").unwrap()
}

fn split_recursive<'a>(
    lines: &[(usize, &'a str)],
    level: usize,
    heading_path: Vec<String>,
    max_tokens: usize,
    counter: &dyn TokenCounter,
    out: &mut Vec<ChunkDraft>,
) {
    if lines.is_empty() {
        return;
    }

    let whole = join(lines);
    if counter.count(&whole) <= max_tokens {
        emit(lines, heading_path, out);
        return;
    }

    if level > 6 {
        // Beyond depth 6: delegate to the line chunker.
        for draft in chunk_lines(&whole, max_tokens, counter) {
            out.push(ChunkDraft {
                kind: ChunkKind::Markdown,
                heading_path: heading_path.clone(),
                ..draft
            });
        }
        return;
    }

    let re = heading_re();
    let sections = split_by_level(lines, level, &re);
    if sections.len() <= 1 && sections.first().map(|s| s.heading.is_none()).unwrap_or(true) {
        // No heading found at this level: recurse to the next level.
        split_recursive(lines, level + 1, heading_path, max_tokens, counter, out);
        return;
    }

    for section in sections {
        let mut child_path = heading_path.clone();
        let header_cost = if let Some(h) = section.heading {
            child_path.push(h.to_string());
            counter.count(h)
        } else {
            0
        };
        let remaining_budget = max_tokens.saturating_sub(header_cost).max(1);
        split_recursive(
            &section.body_lines,
            level + 1,
            child_path,
            remaining_budget,
            counter,
            out,
        );
    }
}

fn split_by_level<'a>(lines: &[(usize, &'a str)], level: usize, re: &Regex) -> Vec<Section<'a>> {
    let marker = "#".repeat(level);
    let mut sections = Vec::new();
    let mut current_heading: Option<&'a str> = None;
    let mut current_body: Vec<(usize, &'a str)> = Vec::new();
    let mut in_fence = false;

    for &(line_no, line) in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let is_heading_at_level = !in_fence
            && re
                .captures(line)
                .map(|c| c.get(1).unwrap().as_str().len() == level)
                .unwrap_or(false);

        if is_heading_at_level {
            if current_heading.is_some() || !current_body.is_empty() {
                sections.push(Section {
                    heading: current_heading,
                    body_lines: std::mem::take(&mut current_body),
                });
            }
            let title = re.captures(line).unwrap().get(2).unwrap().as_str();
            let _ = marker;
            current_heading = Some(title);
        } else {
            current_body.push((line_no, line));
        }
    }
    if current_heading.is_some() || !current_body.is_empty() {
        sections.push(Section {
            heading: current_heading,
            body_lines: current_body,
        });
    }
    sections
}

fn emit(lines: &[(usize, &str)], heading_path: Vec<String>, out: &mut Vec<ChunkDraft>) {
    if lines.is_empty() {
        return;
    }
    let start_line = lines.first().unwrap().0;
    let end_line = lines.last().unwrap().0;
    out.push(ChunkDraft {
        kind: ChunkKind::Markdown,
        start_line,
        end_line,
        content: join(lines),
        heading_path,
        symbol: None,
    });
}

fn join(lines: &[(usize, &str)]) -> String {
    lines
        .iter()
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::HeuristicTokenCounter;

    #[test]
    fn whole_file_under_budget_is_one_chunk() {
        let text = "# Title\n\nhello\nworld\n";
        let drafts = chunk_markdown(text, 4000, &HeuristicTokenCounter);
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn splits_by_h1_when_over_budget() {
        let text = format!("# A\n{}\n# B\n{}\n", "x ".repeat(200), "y ".repeat(200));
        let drafts = chunk_markdown(&text, 50, &HeuristicTokenCounter);
        assert!(drafts.len() >= 2);
        assert!(drafts.iter().any(|d| d.heading_path == vec!["A".to_string()]));
        assert!(drafts.iter().any(|d| d.heading_path == vec!["B".to_string()]));
    }
}
