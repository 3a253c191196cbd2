//! Native Burn-based semantic embeddings for `ctxd-core`'s Embedding Index
//! (C5, §4.5): a small local BERT encoder (`bert.rs`), a cache-then-fetch
//! model/tokenizer loader (`model_loader.rs`), and the tokenize -> forward
//! -> mean-pool -> L2-normalize pipeline (`embeddings_burn.rs`) behind a
//! plain synchronous [`Embedder`] handle.
//!
//! This crate deliberately has no dependency on `ctxd-core`: it is a pure
//! model-inference library. `ctxd-core`'s `embed::burn_provider` module
//! (behind the `embeddings` feature) wraps [`Embedder`] to implement the
//! `EmbeddingProvider` trait, running the blocking Burn inference on a
//! `tokio::task::spawn_blocking` worker per §5's "CPU-heavy work is
//! executed on a bounded worker pool" rule.

#![recursion_limit = "256"]

mod bert;
mod model_loader;
mod embeddings_burn;
#[cfg(test)]
mod quantization_test;
#[cfg(test)]
mod backend_tests;

pub use embeddings_burn::{Embedder, EmbeddingBackend, EMBEDDING_DIM};
pub use model_loader::{cache_dir, MODEL_ID};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("failed to load model weights: {0}")]
    ModelLoad(String),
    #[error("tokenization failed: {0}")]
    Tokenize(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model/tokenizer fetch failed: {0}")]
    Network(String),
    #[error("fetched resource origin not allowlisted: {0}")]
    InvalidOrigin(String),
    #[error("fetched resource failed SHA256 integrity check")]
    Integrity,
    #[error("fetch rate-limited for {0}, retry later")]
    RateLimited(String),
    #[error("local model cache error: {0}")]
    Cache(String),
}
