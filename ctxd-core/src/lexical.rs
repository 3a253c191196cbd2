//! Lexical Index (C6, §4.6). BM25 over an inverted index, partitioned per
//! `(dir, branch)` the same way the catalog partitions by `Tag`. Grounded on
//! the teacher's `index.rs::build_inverted_index`/`search_index` (term
//! postings, tf/df bookkeeping) generalized from a single in-memory
//! `IndexFile` to an incrementally updatable structure keyed by cache key.

use crate::error::{Error, Result};
use crate::model::{Chunk, Posting, Tag, TermEntry};
use crate::util::tokenize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Per-`(dir, branch)` inverted index (§4.6). Persisted at
/// `index/lexical/<dir-escaped>/<branch>/` (§6) as a length-prefixed binary
/// snapshot, the same hand-rolled persistence idiom as `merkle.rs`/
/// `embed/store.rs` — the teacher has no lexical persistence at all (its
/// `index.rs` BM25 index lives only inside an in-memory `IndexFile`).
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    terms: BTreeMap<String, TermEntry>,
    doc_lengths: BTreeMap<(String, usize), usize>,
    total_doc_len: u64,
    doc_count: usize,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every posting for `cache_key` (used ahead of a re-insert on
    /// content change, or alone on deletion — §4.3's `del`/`removeTag`).
    pub fn remove_file(&mut self, cache_key: &str) {
        for ((key, _), len) in self.doc_lengths.iter().filter(|((k, _), _)| k == cache_key) {
            let _ = key;
            self.total_doc_len = self.total_doc_len.saturating_sub(*len as u64);
            self.doc_count = self.doc_count.saturating_sub(1);
        }
        self.doc_lengths.retain(|(key, _), _| key != cache_key);
        for entry in self.terms.values_mut() {
            let before = entry.postings.len();
            entry.postings.retain(|p| p.cache_key != cache_key);
            if entry.postings.len() != before {
                entry.df = entry.postings.iter().map(|p| &p.cache_key).collect::<std::collections::HashSet<_>>().len();
            }
        }
        self.terms.retain(|_, entry| !entry.postings.is_empty());
    }

    /// Indexes every chunk cut from one file. Callers remove the file's
    /// previous postings first if this is a re-index (§4.3 `compute`).
    pub fn index_chunks(&mut self, cache_key: &str, chunks: &[Chunk]) {
        for chunk in chunks {
            let tokens = tokenize(&chunk.content);
            let doc_len = tokens.len();
            self.doc_lengths.insert((cache_key.to_string(), chunk.index), doc_len);
            self.total_doc_len += doc_len as u64;
            self.doc_count += 1;

            let mut tf: BTreeMap<String, usize> = BTreeMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, count) in tf {
                let entry = self.terms.entry(term).or_default();
                entry.postings.push(Posting {
                    cache_key: cache_key.to_string(),
                    chunk_index: chunk.index,
                    tf: count,
                    doc_len,
                });
                entry.df += 1;
            }
        }
    }

    fn avg_doc_len(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_doc_len as f32 / self.doc_count as f32
        }
    }

    /// BM25-scored search over the indexed chunks (§4.6).
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, usize, f32)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.doc_count == 0 {
            return Vec::new();
        }
        let avg_len = self.avg_doc_len();
        let n = self.doc_count as f32;

        let mut scores: BTreeMap<(String, usize), f32> = BTreeMap::new();
        for term in &query_terms {
            let Some(entry) = self.terms.get(term) else { continue };
            let df = entry.df.max(1) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for posting in &entry.postings {
                let tf = posting.tf as f32;
                let norm = 1.0 - B + B * (posting.doc_len as f32 / avg_len.max(1.0));
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
                *scores
                    .entry((posting.cache_key.clone(), posting.chunk_index))
                    .or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(String, usize, f32)> = scores
            .into_iter()
            .map(|((cache_key, idx), score)| (cache_key, idx, score))
            .collect();
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn dir_for(root: &Path, tag: &Tag) -> PathBuf {
        root.join("index").join("lexical").join(tag.escaped_dir()).join(&tag.branch)
    }

    pub fn save(&self, root: &Path, tag: &Tag) -> Result<()> {
        let dir = Self::dir_for(root, tag);
        std::fs::create_dir_all(&dir).map_err(|e| lexical_io(format!("{e}")))?;
        let path = dir.join("index.bin");
        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| lexical_io(format!("{e}")))?;

        write_u32(&mut file, self.doc_count as u32)?;
        write_u64(&mut file, self.total_doc_len)?;
        write_u32(&mut file, self.doc_lengths.len() as u32)?;
        for ((cache_key, chunk_index), len) in &self.doc_lengths {
            write_string(&mut file, cache_key)?;
            write_u32(&mut file, *chunk_index as u32)?;
            write_u32(&mut file, *len as u32)?;
        }
        write_u32(&mut file, self.terms.len() as u32)?;
        for (term, entry) in &self.terms {
            write_string(&mut file, term)?;
            write_u32(&mut file, entry.df as u32)?;
            write_u32(&mut file, entry.postings.len() as u32)?;
            for posting in &entry.postings {
                write_string(&mut file, &posting.cache_key)?;
                write_u32(&mut file, posting.chunk_index as u32)?;
                write_u32(&mut file, posting.tf as u32)?;
                write_u32(&mut file, posting.doc_len as u32)?;
            }
        }
        file.flush().map_err(|e| lexical_io(format!("{e}")))?;
        std::fs::rename(&tmp, &path).map_err(|e| lexical_io(format!("{e}")))?;
        Ok(())
    }

    /// A missing snapshot is treated as an empty index (mirrors the
    /// Merkle Builder's "missing previous tree is empty" rule, §4.2).
    pub fn load(root: &Path, tag: &Tag) -> Result<Self> {
        let path = Self::dir_for(root, tag).join("index.bin");
        if !path.exists() {
            return Ok(Self::new());
        }
        let mut file = std::fs::File::open(&path).map_err(|e| lexical_io(format!("{e}")))?;

        let doc_count = read_u32(&mut file)? as usize;
        let total_doc_len = read_u64(&mut file)?;
        let doc_len_count = read_u32(&mut file)?;
        let mut doc_lengths = BTreeMap::new();
        for _ in 0..doc_len_count {
            let cache_key = read_string(&mut file)?;
            let chunk_index = read_u32(&mut file)? as usize;
            let len = read_u32(&mut file)? as usize;
            doc_lengths.insert((cache_key, chunk_index), len);
        }
        let term_count = read_u32(&mut file)?;
        let mut terms = BTreeMap::new();
        for _ in 0..term_count {
            let term = read_string(&mut file)?;
            let df = read_u32(&mut file)? as usize;
            let posting_count = read_u32(&mut file)?;
            let mut postings = Vec::with_capacity(posting_count as usize);
            for _ in 0..posting_count {
                let cache_key = read_string(&mut file)?;
                let chunk_index = read_u32(&mut file)? as usize;
                let tf = read_u32(&mut file)? as usize;
                let doc_len = read_u32(&mut file)? as usize;
                postings.push(Posting { cache_key, chunk_index, tf, doc_len });
            }
            terms.insert(term, TermEntry { df, postings });
        }
        Ok(Self { terms, doc_lengths, total_doc_len, doc_count })
    }
}

fn lexical_io(message: String) -> Error {
    Error::CatalogWrite { message }
}

fn write_u32(w: &mut impl Write, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes()).map_err(|e| lexical_io(format!("{e}")))
}

fn write_u64(w: &mut impl Write, value: u64) -> Result<()> {
    w.write_all(&value.to_le_bytes()).map_err(|e| lexical_io(format!("{e}")))
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| lexical_io(format!("{e}")))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| lexical_io(format!("{e}")))?;
    Ok(u64::from_le_bytes(buf))
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes()).map_err(|e| lexical_io(format!("{e}")))
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| lexical_io(format!("{e}")))?;
    String::from_utf8(buf).map_err(|e| lexical_io(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChunkKind;

    fn chunk(index: usize, content: &str) -> Chunk {
        Chunk {
            digest: "d".into(),
            index,
            filepath: "a.rs".into(),
            kind: ChunkKind::Text,
            start_line: 1,
            end_line: 1,
            content: content.into(),
            token_estimate: 1,
            heading_path: Vec::new(),
            symbol: None,
            slug: "a".into(),
        }
    }

    #[test]
    fn search_ranks_matching_document_first() {
        let mut index = LexicalIndex::new();
        index.index_chunks("d1", &[chunk(0, "the quick brown fox jumps")]);
        index.index_chunks("d2", &[chunk(0, "completely unrelated content")]);
        let results = index.search("quick fox", 10);
        assert_eq!(results[0].0, "d1");
    }

    #[test]
    fn remove_file_clears_its_postings() {
        let mut index = LexicalIndex::new();
        index.index_chunks("d1", &[chunk(0, "quick fox")]);
        index.remove_file("d1");
        assert_eq!(index.doc_count(), 0);
        assert!(index.search("quick", 10).is_empty());
    }

    #[test]
    fn save_then_load_round_trips_scores() {
        let dir = tempfile::tempdir().unwrap();
        let tag = Tag::new("/repo", "main", crate::model::ArtifactKind::Lexical);
        let mut index = LexicalIndex::new();
        index.index_chunks("d1", &[chunk(0, "the quick brown fox")]);
        index.index_chunks("d2", &[chunk(0, "completely unrelated content")]);
        index.save(dir.path(), &tag).unwrap();

        let loaded = LexicalIndex::load(dir.path(), &tag).unwrap();
        assert_eq!(loaded.doc_count(), index.doc_count());
        assert_eq!(loaded.search("quick fox", 10), index.search("quick fox", 10));
    }

    #[test]
    fn load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tag = Tag::new("/repo", "main", crate::model::ArtifactKind::Lexical);
        let loaded = LexicalIndex::load(dir.path(), &tag).unwrap();
        assert_eq!(loaded.doc_count(), 0);
    }
}
