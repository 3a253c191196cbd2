//! `EmbeddingProvider` wrapper around `ctxd-embed-burn`'s native Burn BERT
//! encoder (§4.5, §9 "dynamic provider registry" -> capability set with a
//! factory-constructed variant). Only compiled under the `embeddings`
//! feature, matching the optional `ctxd-embed-burn` path dependency in
//! `Cargo.toml`.
//!
//! The model load and forward pass are synchronous, CPU-bound Burn calls;
//! per §5 ("CPU-heavy work is executed on a bounded worker pool so it does
//! not starve the I/O loop") each batch runs inside a
//! `tokio::task::spawn_blocking`.

use super::EmbeddingProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use ctxd_embed_burn::Embedder;
use std::sync::Arc;

pub struct BurnProvider {
    embedder: Arc<Embedder>,
    model: String,
}

impl BurnProvider {
    /// Constructs the embedder eagerly (loads or falls back to hash
    /// embeddings immediately) so a broken model cache surfaces at
    /// startup rather than on the first query.
    pub fn new() -> Self {
        let embedder = Embedder::create();
        let model = embedder.model_id().to_string();
        Self { embedder: Arc::new(embedder), model }
    }
}

impl Default for BurnProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for BurnProvider {
    fn provider_id(&self) -> &str {
        "burn"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        ctxd_embed_burn::EMBEDDING_DIM
    }

    fn max_batch_size(&self) -> usize {
        32
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| Error::ProviderPermanent {
                provider: "burn".to_string(),
                message: format!("embedding worker task panicked: {e}"),
            })?
            .map_err(|e| Error::ProviderTransient {
                provider: "burn".to_string(),
                message: e.to_string(),
            })
    }
}
