//! Reranker contract (§4.8, §6). No teacher counterpart at all — the
//! teacher crate has no reranking stage. Modeled directly on the reranker
//! contract text: an async trait scoring `(query, candidate)` pairs, with
//! `Error::ProviderPermanent` causing the retrieval pipeline to fall back to
//! the pre-rerank (stage 3) ordering rather than failing the whole query.

use crate::error::Result;
use async_trait::async_trait;

/// Scores a query against a fixed set of candidate texts, returning one
/// relevance score per candidate in the same order.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// A reranker that leaves the stage-3 ordering untouched, returning scores
/// equal to each candidate's original rank position (descending). Used as
/// the default when no reranker is configured (`RerankerConfig::name` is
/// `None`) and as the drop-in after a real reranker fails permanently.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    fn name(&self) -> &str {
        "noop"
    }

    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let n = candidates.len();
        Ok((0..n).map(|i| (n - i) as f32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_preserves_input_order() {
        let reranker = NoopReranker;
        let scores = reranker
            .rerank("query", &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
    }
}
