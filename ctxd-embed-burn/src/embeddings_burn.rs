//! Embedding generation via a local Burn BERT model, with an automatic
//! fallback chain (model -> hash-based) so the crate never hard-fails on a
//! model-loading problem. Grounded on the teacher's
//! `embeddings_burn.rs`: same `EmbeddingBackend` trait shape, same
//! mean-pool + L2-normalize tensor math, same `SmartEmbeddingGenerator`
//! fallback enum — with the WebGPU backend and wasm-bindgen boundary
//! dropped (§ "out of scope": this crate now runs natively inside the
//! CLI/MCP process, not in a browser) in favor of the CPU `burn-ndarray`
//! backend alone.

use crate::model_loader::{self, MODEL_ID};
use crate::EmbedError;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_ndarray::{NdArray, NdArrayDevice};
use tokenizers::Tokenizer;

/// Embedding dimension for arctic-embed-s.
pub const EMBEDDING_DIM: usize = 384;
const MAX_SEQ_LENGTH: usize = 512;

/// Backend-agnostic embedding generator.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
    fn dimension(&self) -> usize;
}

/// CPU embedding generator (`burn-ndarray` backend).
pub struct CpuEmbeddingGenerator {
    model: model_loader::Model<NdArray>,
    tokenizer: Tokenizer,
    device: NdArrayDevice,
}

impl CpuEmbeddingGenerator {
    pub fn new() -> Result<Self, EmbedError> {
        let device = NdArrayDevice::default();
        let tokenizer_bytes = model_loader::load_tokenizer_bytes()?;
        let tokenizer =
            Tokenizer::from_bytes(&tokenizer_bytes).map_err(|e| EmbedError::Tokenize(e.to_string()))?;
        let model = model_loader::load_model_cpu(&device)?;
        Ok(Self { model, tokenizer, device })
    }
}

impl EmbeddingBackend for CpuEmbeddingGenerator {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        embed_with_model(&self.model, &self.tokenizer, &self.device, text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        embed_batch_with_model(&self.model, &self.tokenizer, &self.device, texts)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Deterministic hash-based fallback, used when the model or tokenizer
/// cannot be fetched (offline, network-restricted sandboxes, etc). Not a
/// semantic embedding, but keeps the pipeline functional end to end.
pub struct HashEmbeddingGenerator;

impl HashEmbeddingGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HashEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingBackend for HashEmbeddingGenerator {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
        for i in 0..EMBEDDING_DIM {
            let idx = i % hash.len();
            embedding.push((hash[idx] as f32 - 128.0) / 128.0);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Automatic fallback chain: local Burn model, else hash-based.
pub enum SmartEmbeddingGenerator {
    Model(CpuEmbeddingGenerator),
    Hash(HashEmbeddingGenerator),
}

impl SmartEmbeddingGenerator {
    pub fn new() -> Self {
        match CpuEmbeddingGenerator::new() {
            Ok(gen) => {
                tracing::info!(model = MODEL_ID, "embeddings backend: burn (cpu)");
                Self::Model(gen)
            }
            Err(err) => {
                tracing::warn!(error = %err, "burn embedding model unavailable, falling back to hash embeddings");
                Self::Hash(HashEmbeddingGenerator::new())
            }
        }
    }
}

impl Default for SmartEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingBackend for SmartEmbeddingGenerator {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        match self {
            Self::Model(gen) => gen.embed(text),
            Self::Hash(gen) => gen.embed(text),
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            Self::Model(gen) => gen.embed_batch(texts),
            Self::Hash(gen) => gen.embed_batch(texts),
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::Model(gen) => gen.dimension(),
            Self::Hash(gen) => gen.dimension(),
        }
    }
}

fn embed_with_model<B: Backend>(
    model: &model_loader::Model<B>,
    tokenizer: &Tokenizer,
    device: &B::Device,
    text: &str,
) -> Result<Vec<f32>, EmbedError> {
    let encoding = tokenizer.encode(text, true).map_err(|e| EmbedError::Tokenize(e.to_string()))?;

    let input_ids: Vec<i64> =
        encoding.get_ids().iter().take(MAX_SEQ_LENGTH).map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .take(MAX_SEQ_LENGTH)
        .map(|&mask| mask as i64)
        .collect();

    if input_ids.is_empty() {
        return Err(EmbedError::Tokenize("tokenization produced no input ids".to_string()));
    }

    let seq_len = input_ids.len();
    let input_ids = Tensor::<B, 2, Int>::from_ints(TensorData::new(input_ids, [1, seq_len]), device);
    let attention_mask =
        Tensor::<B, 2, Int>::from_ints(TensorData::new(attention_mask, [1, seq_len]), device);

    let hidden = model.forward(input_ids, attention_mask.clone());
    let pooled = mean_pool(hidden, attention_mask);
    let normalized = l2_normalize(pooled);

    normalized
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| EmbedError::Inference(format!("{e:?}")))
}

fn embed_batch_with_model<B: Backend>(
    model: &model_loader::Model<B>,
    tokenizer: &Tokenizer,
    device: &B::Device,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut encoded_ids: Vec<Vec<i64>> = Vec::with_capacity(texts.len());
    let mut encoded_masks: Vec<Vec<i64>> = Vec::with_capacity(texts.len());
    let mut max_len = 0usize;

    for text in texts {
        let encoding = tokenizer.encode(text.as_str(), true).map_err(|e| EmbedError::Tokenize(e.to_string()))?;
        let ids: Vec<i64> = encoding.get_ids().iter().take(MAX_SEQ_LENGTH).map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .take(MAX_SEQ_LENGTH)
            .map(|&mask| mask as i64)
            .collect();

        if ids.is_empty() {
            return Err(EmbedError::Tokenize("tokenization produced no input ids".to_string()));
        }

        max_len = max_len.max(ids.len());
        encoded_ids.push(ids);
        encoded_masks.push(mask);
    }

    let batch_size = encoded_ids.len();
    let mut flat_ids: Vec<i64> = Vec::with_capacity(batch_size * max_len);
    let mut flat_masks: Vec<i64> = Vec::with_capacity(batch_size * max_len);

    for (mut ids, mut masks) in encoded_ids.into_iter().zip(encoded_masks) {
        ids.resize(max_len, 0);
        masks.resize(max_len, 0);
        flat_ids.extend_from_slice(&ids);
        flat_masks.extend_from_slice(&masks);
    }

    let input_ids = Tensor::<B, 2, Int>::from_ints(TensorData::new(flat_ids, [batch_size, max_len]), device);
    let attention_mask =
        Tensor::<B, 2, Int>::from_ints(TensorData::new(flat_masks, [batch_size, max_len]), device);

    let hidden = model.forward(input_ids, attention_mask.clone());
    let pooled = mean_pool(hidden, attention_mask);
    let normalized = l2_normalize(pooled);

    let flat = normalized
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| EmbedError::Inference(format!("{e:?}")))?;

    if flat.len() != batch_size * EMBEDDING_DIM {
        return Err(EmbedError::Inference("embedding batch size mismatch".to_string()));
    }

    Ok(flat.chunks(EMBEDDING_DIM).map(|chunk| chunk.to_vec()).collect())
}

fn mean_pool<B: Backend>(hidden: Tensor<B, 3>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    let mask = attention_mask.float().unsqueeze_dim::<3>(2);
    let masked = hidden * mask.clone();
    let sum = masked.sum_dim(1);
    let denom = mask.sum_dim(1).clamp_min(1e-6);
    let pooled = sum / denom;
    pooled.squeeze_dim::<2>(1)
}

fn l2_normalize<B: Backend>(embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = embeddings.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    embeddings / norm
}

/// Native embedding generator, backend-selected at construction time.
/// Synchronous by design: the `ctxd-core` provider wrapper calls it from
/// inside a `tokio::task::spawn_blocking` worker.
pub struct Embedder {
    inner: SmartEmbeddingGenerator,
}

impl Embedder {
    pub fn create() -> Self {
        Self { inner: SmartEmbeddingGenerator::new() }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.inner.embed(text)
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.inner.embed_batch(texts)
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    pub fn model_id(&self) -> &'static str {
        match &self.inner {
            SmartEmbeddingGenerator::Model(_) => MODEL_ID,
            SmartEmbeddingGenerator::Hash(_) => "hash-based-v1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_correctness() {
        let device = NdArrayDevice::default();

        let hidden_data = vec![
            1.0, 2.0, 3.0, 4.0, // token 1
            5.0, 6.0, 7.0, 8.0, // token 2
            9.0, 10.0, 11.0, 12.0, // token 3 (padding)
        ];
        let hidden = Tensor::<NdArray, 3>::from_data(TensorData::new(hidden_data, [1, 3, 4]), &device);

        let attention_mask =
            Tensor::<NdArray, 2, Int>::from_data(TensorData::new(vec![1, 1, 0], [1, 3]), &device);

        let pooled = mean_pool(hidden, attention_mask);
        let result: Vec<f32> = pooled.to_data().to_vec::<f32>().unwrap();

        let expected = vec![3.0, 4.0, 5.0, 6.0];
        assert_eq!(result.len(), expected.len());
        for (actual, exp) in result.iter().zip(expected.iter()) {
            assert!((actual - exp).abs() < 1e-5_f32);
        }
    }

    #[test]
    fn hash_embedding_is_deterministic_and_normalized() {
        let gen = HashEmbeddingGenerator::new();
        let a = gen.embed("hello world").unwrap();
        let b = gen.embed("hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn hash_embedding_differs_across_inputs() {
        let gen = HashEmbeddingGenerator::new();
        let a = gen.embed("machine learning with rust").unwrap();
        let b = gen.embed("deep learning with python").unwrap();
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!(dot < 0.99);
    }
}
