//! Retrieval Pipeline: Reciprocal Rank Fusion (`k=60`) and a weighted
//! linear-combination of normalized cosine/BM25/recency scores, selectable
//! via `HybridStrategy`.
//!
//! Query embedding -> vector top-K and lexical BM25 top-K run independently
//! (tag-filtered against the catalog's live `cacheKey` set), fused, deduped
//! per file, optionally reranked with a fallback to the pre-rerank ordering,
//! and truncated to `nFinal`.

use crate::catalog::CatalogStore;
use crate::chunk_store::ChunkStore;
use crate::config::RetrievalConfig;
use crate::embed::{EmbeddingProvider, EmbeddingStore};
use crate::error::{Error, Result};
use crate::lexical::LexicalIndex;
use crate::model::{ArtifactKind, ContextItem, EmbeddingSpaceId, HybridStrategy, SearchFilters, Tag};
use crate::rerank::Reranker;
use crate::rrf::{ids_to_ranked_results, rrf_fusion, RrfConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct RetrievalPipeline {
    catalog: CatalogStore,
    provider: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
    storage_root: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    chunk_index: usize,
    cosine: Option<f32>,
    bm25: Option<f32>,
}

impl RetrievalPipeline {
    pub fn new(
        catalog: CatalogStore,
        provider: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
        config: RetrievalConfig,
        storage_root: PathBuf,
    ) -> Self {
        Self {
            catalog,
            provider,
            reranker,
            config,
            storage_root,
        }
    }

    pub async fn retrieve(
        &self,
        dir: &str,
        branch: &str,
        query: &str,
        filters: &SearchFilters,
        strategy: HybridStrategy,
    ) -> Result<Vec<ContextItem>> {
        let embeddings_tag = Tag::new(dir, branch, ArtifactKind::Embeddings);
        let lexical_tag = Tag::new(dir, branch, ArtifactKind::Lexical);

        let vector_hits = self.vector_candidates(&embeddings_tag, query).await;
        let lexical_hits = self.lexical_candidates(&lexical_tag, query);

        if vector_hits.is_err() && lexical_hits.is_err() {
            return Err(Error::RetrievalUnavailable);
        }
        let vector_hits = vector_hits.unwrap_or_default();
        let lexical_hits = lexical_hits.unwrap_or_default();

        let fused = match strategy {
            HybridStrategy::Rrf => self.fuse_rrf(&vector_hits, &lexical_hits),
            HybridStrategy::Linear => self.fuse_linear(dir, branch, &vector_hits, &lexical_hits).await,
        };

        let chunk_store = ChunkStore::load(&self.storage_root)?;
        let mut items = self.resolve_candidates(dir, branch, fused, &chunk_store, filters).await?;
        items = dedupe_by_file(items, self.config.line_margin);
        items.truncate(self.config.n_retrieve);

        if self.config.use_reranking && items.len() > 1 {
            items = self.rerank_items(query, items).await;
        }

        items.truncate(self.config.n_final);
        Ok(items)
    }

    async fn vector_candidates(&self, tag: &Tag, query: &str) -> Result<Vec<(String, usize, f32)>> {
        let allowed = self.catalog.cache_keys_for_tag(tag.clone()).await?;
        let query_vector = self
            .provider
            .embed_batch(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let space = EmbeddingSpaceId {
            provider_id: self.provider.provider_id().to_string(),
            model: self.provider.model().to_string(),
            dim: self.provider.dim(),
        };
        let store = EmbeddingStore::load(&self.storage_root, space)?;
        Ok(store.search(&query_vector, self.config.n_retrieve, Some(&allowed)))
    }

    fn lexical_candidates(&self, tag: &Tag, query: &str) -> Result<Vec<(String, usize, f32)>> {
        let index = LexicalIndex::load(&self.storage_root, tag)?;
        Ok(index.search(query, self.config.n_retrieve))
    }

    fn fuse_rrf(
        &self,
        vector_hits: &[(String, usize, f32)],
        lexical_hits: &[(String, usize, f32)],
    ) -> Vec<(String, usize)> {
        let vector_ids: Vec<String> = vector_hits.iter().map(|(k, i, _)| format!("{k}:{i}")).collect();
        let lexical_ids: Vec<String> = lexical_hits.iter().map(|(k, i, _)| format!("{k}:{i}")).collect();
        let vector_ranked = ids_to_ranked_results(&vector_ids);
        let lexical_ranked = ids_to_ranked_results(&lexical_ids);
        let merged = rrf_fusion(vec![vector_ranked, lexical_ranked], RrfConfig::default(), self.config.n_retrieve);
        merged
            .into_iter()
            .filter_map(|(id, _)| id.split_once(':').map(|(k, i)| (k.to_string(), i.parse().unwrap_or(0))))
            .collect()
    }

    /// Weighted linear combination of normalized cosine/BM25 scores plus a
    /// recency boost (default weights: `α=0.6` cosine, `β=0.3` BM25, `γ=0.1`
    /// recency).
    async fn fuse_linear(
        &self,
        dir: &str,
        branch: &str,
        vector_hits: &[(String, usize, f32)],
        lexical_hits: &[(String, usize, f32)],
    ) -> Vec<(String, usize)> {
        let mut candidates: BTreeMap<(String, usize), Candidate> = BTreeMap::new();
        for (cache_key, chunk_index, score) in vector_hits {
            candidates
                .entry((cache_key.clone(), *chunk_index))
                .or_insert(Candidate { chunk_index: *chunk_index, cosine: None, bm25: None })
                .cosine = Some(*score);
        }
        for (cache_key, chunk_index, score) in lexical_hits {
            candidates
                .entry((cache_key.clone(), *chunk_index))
                .or_insert(Candidate { chunk_index: *chunk_index, cosine: None, bm25: None })
                .bm25 = Some(*score);
        }

        let max_bm25 = lexical_hits.iter().map(|(_, _, s)| *s).fold(0.0f32, f32::max).max(1e-6);
        let chunks_tag = Tag::new(dir, branch, ArtifactKind::Chunks);
        let mut now = 0i64;
        let mut oldest = i64::MAX;
        let mut timestamps: BTreeMap<String, i64> = BTreeMap::new();
        for (cache_key, _) in candidates.keys() {
            if timestamps.contains_key(cache_key) {
                continue;
            }
            if let Ok(Some((_, last_updated))) =
                self.catalog.path_for_cache_key(chunks_tag.clone(), cache_key.clone()).await
            {
                now = now.max(last_updated);
                oldest = oldest.min(last_updated);
                timestamps.insert(cache_key.clone(), last_updated);
            }
        }
        let span = (now - oldest).max(1) as f32;

        let mut scored: Vec<((String, usize), f32)> = candidates
            .into_iter()
            .map(|((cache_key, chunk_index), candidate)| {
                let cosine = candidate.cosine.unwrap_or(0.0).max(0.0);
                let bm25 = candidate.bm25.unwrap_or(0.0) / max_bm25;
                let recency = timestamps
                    .get(&cache_key)
                    .map(|t| (*t - oldest).max(0) as f32 / span)
                    .unwrap_or(0.0);
                let score = self.config.alpha_cosine * cosine
                    + self.config.beta_bm25 * bm25
                    + self.config.gamma_recency * recency;
                ((cache_key, chunk_index), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.n_retrieve);
        scored.into_iter().map(|(k, _)| k).collect()
    }

    async fn resolve_candidates(
        &self,
        dir: &str,
        branch: &str,
        fused: Vec<(String, usize)>,
        chunk_store: &ChunkStore,
        filters: &SearchFilters,
    ) -> Result<Vec<ContextItem>> {
        let chunks_tag = Tag::new(dir, branch, ArtifactKind::Chunks);
        let mut out = Vec::new();
        let total = fused.len().max(1) as f32;
        for (rank, (cache_key, chunk_index)) in fused.into_iter().enumerate() {
            let Some(chunks) = chunk_store.get(&cache_key) else { continue };
            let Some(chunk) = chunks.iter().find(|c| c.index == chunk_index) else { continue };

            if let Some(prefix) = &filters.path_prefix {
                if !chunk.filepath.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(kind) = filters.kind {
                if chunk.kind != kind {
                    continue;
                }
            }
            if let Some(prefix) = &filters.heading_prefix {
                if !chunk.heading_path.iter().any(|h| h.starts_with(prefix.as_str())) {
                    continue;
                }
            }
            if let Some(prefix) = &filters.symbol_prefix {
                if !chunk.symbol.as_deref().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false) {
                    continue;
                }
            }

            let path = self
                .catalog
                .path_for_cache_key(chunks_tag.clone(), cache_key.clone())
                .await?
                .map(|(path, _)| path)
                .unwrap_or_else(|| chunk.filepath.clone());

            out.push(ContextItem {
                filepath: path,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content: chunk.content.clone(),
                score: (total - rank as f32) / total,
            });
        }
        Ok(out)
    }

    async fn rerank_items(&self, query: &str, items: Vec<ContextItem>) -> Vec<ContextItem> {
        let texts: Vec<String> = items.iter().map(|c| c.content.clone()).collect();
        match self.reranker.rerank(query, &texts).await {
            Ok(scores) if scores.len() == items.len() => {
                let mut scored: Vec<(ContextItem, f32)> = items.into_iter().zip(scores).collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                scored
                    .into_iter()
                    .map(|(mut item, score)| {
                        item.score = score;
                        item
                    })
                    .collect()
            }
            _ => {
                tracing::warn!(reranker = self.reranker.name(), "reranker failed, falling back to fused ordering");
                items
            }
        }
    }
}

/// Keeps only the highest-scoring chunk per file and widens its line range
/// by `margin` lines on each side (§4.8 step 4: "prefer the highest-scored
/// chunk and expand its line range by a small margin").
fn dedupe_by_file(items: Vec<ContextItem>, margin: usize) -> Vec<ContextItem> {
    let mut best: BTreeMap<String, ContextItem> = BTreeMap::new();
    for item in items {
        match best.get(&item.filepath) {
            Some(existing) if existing.score >= item.score => {}
            _ => {
                best.insert(item.filepath.clone(), item);
            }
        }
    }
    let mut out: Vec<ContextItem> = best
        .into_values()
        .map(|item| expand_line_range(item, margin))
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Widens `item`'s line range by `margin` lines on each side and re-reads
/// the expanded content from disk. Best-effort: if the source file can no
/// longer be read (deleted, moved, not a real filesystem path in a test
/// fixture), the item is returned unchanged rather than failing retrieval.
fn expand_line_range(mut item: ContextItem, margin: usize) -> ContextItem {
    if margin == 0 {
        return item;
    }
    let Ok(text) = std::fs::read_to_string(&item.filepath) else {
        return item;
    };
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return item;
    }
    let expanded_start = item.start_line.saturating_sub(margin).max(1);
    let expanded_end = (item.end_line + margin).min(lines.len());
    if expanded_end < expanded_start {
        return item;
    }
    let content = lines[(expanded_start - 1)..expanded_end].join("\n");
    item.start_line = expanded_start;
    item.end_line = expanded_end;
    item.content = content;
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_highest_scoring_chunk_per_file() {
        let items = vec![
            ContextItem { filepath: "a.rs".into(), start_line: 1, end_line: 2, content: "x".into(), score: 0.2 },
            ContextItem { filepath: "a.rs".into(), start_line: 3, end_line: 4, content: "y".into(), score: 0.9 },
            ContextItem { filepath: "b.rs".into(), start_line: 1, end_line: 2, content: "z".into(), score: 0.5 },
        ];
        let out = dedupe_by_file(items, 0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].filepath, "a.rs");
        assert_eq!(out[0].content, "y");
    }

    #[test]
    fn dedupe_expands_line_range_by_margin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "one\ntwo\nthree\nfour\nfive\n").unwrap();
        let items = vec![ContextItem {
            filepath: path.to_string_lossy().to_string(),
            start_line: 3,
            end_line: 3,
            content: "three".into(),
            score: 0.9,
        }];
        let out = dedupe_by_file(items, 1);
        assert_eq!(out[0].start_line, 2);
        assert_eq!(out[0].end_line, 4);
        assert_eq!(out[0].content, "two\nthree\nfour");
    }

    #[test]
    fn dedupe_leaves_item_unchanged_when_file_unreadable() {
        let items = vec![ContextItem {
            filepath: "/nonexistent/path/a.rs".into(),
            start_line: 3,
            end_line: 3,
            content: "three".into(),
            score: 0.9,
        }];
        let out = dedupe_by_file(items, 2);
        assert_eq!(out[0].start_line, 3);
        assert_eq!(out[0].end_line, 3);
        assert_eq!(out[0].content, "three");
    }
}
