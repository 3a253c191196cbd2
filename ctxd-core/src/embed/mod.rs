//! Embedding Index (C5, §4.5). No direct teacher counterpart — the teacher
//! shipped its Burn model behind a wasm-bindgen boundary with no batching,
//! retry or on-disk store of its own. This module is grounded on the
//! teacher's tensor/pooling code (kept in `ctxd-embed-burn`) for the actual
//! embedding math, and on cocode-rs's `embeddings/` (openai.rs provider
//! shape, queue.rs batching) for the provider/batcher split.

mod batcher;
mod hashing;
mod store;
#[cfg(feature = "embeddings")]
mod burn_provider;

pub use batcher::Batcher;
pub use hashing::HashingProvider;
pub use store::EmbeddingStore;
#[cfg(feature = "embeddings")]
pub use burn_provider::BurnProvider;

use crate::config::EmbeddingsProviderConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A provider that turns chunk text into fixed-dimension vectors, batched
/// for efficiency (§4.5: "providers expose a `maxBatchSize`").
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_batch_size(&self) -> usize;

    /// Embeds a batch of texts, in order. A transient failure
    /// (`Error::ProviderTransient`) is retryable; a permanent one
    /// (`Error::ProviderPermanent`) aborts the whole batch (§4.5, §9).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds an arbitrarily-sized slice of `texts` by chopping it into
/// `provider.max_batch_size()`-sized pieces and delegating each to
/// [`Batcher::run`] for retry handling.
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    max_retries: u32,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let batcher = Batcher::new(max_retries);
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(provider.max_batch_size().max(1)) {
        let vectors = batcher
            .run(|| {
                let provider = provider;
                let chunk = chunk.to_vec();
                Box::pin(async move { provider.embed_batch(&chunk).await })
            })
            .await?;
        if vectors.len() != chunk.len() {
            return Err(Error::ProviderPermanent {
                provider: provider.provider_id().to_string(),
                message: format!(
                    "expected {} vectors, provider returned {}",
                    chunk.len(),
                    vectors.len()
                ),
            });
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Builds the configured provider (§5: `embeddingsProvider.provider` selects
/// the implementation). `"burn"` requires the `embeddings` feature; falling
/// back to `HashingProvider` for an unrecognized name keeps refresh/search
/// usable even with a typo'd config rather than hard-failing at startup.
pub fn build_provider(config: &EmbeddingsProviderConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        #[cfg(feature = "embeddings")]
        "burn" => Arc::new(burn_provider::BurnProvider::new()),
        _ => Arc::new(HashingProvider::new(64)),
    }
}
