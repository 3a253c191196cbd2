//! A deterministic, always-available embedding provider with no external
//! dependency — used as the config default (§4.5) and in tests. Grounded on
//! the teacher's own `sha256_hex`/tokenize helpers in `util.rs`: hashes each
//! token into a bucket of a fixed-size vector, instead of a real model.

use super::EmbeddingProvider;
use crate::error::Result;
use crate::util::{sha256_hex, tokenize};
use async_trait::async_trait;

pub struct HashingProvider {
    model: String,
    dim: usize,
}

impl HashingProvider {
    pub fn new(dim: usize) -> Self {
        Self {
            model: "hash-v1".to_string(),
            dim,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dim];
        for token in tokenize(text) {
            let digest = sha256_hex(token.as_bytes());
            let bucket_bytes = &digest.as_bytes()[0..8];
            let bucket = u64::from_str_radix(std::str::from_utf8(bucket_bytes).unwrap_or("0"), 16)
                .unwrap_or(0) as usize
                % self.dim;
            let sign = if digest.as_bytes()[8] % 2 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        for v in &mut vector {
            *v /= norm;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn provider_id(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_batch_size(&self) -> usize {
        256
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_deterministic() {
        let provider = HashingProvider::new(32);
        let a = provider.embed_batch(&["hello world".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn distinguishes_different_text() {
        let provider = HashingProvider::new(32);
        let a = provider.embed_batch(&["alpha".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["beta".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }
}
