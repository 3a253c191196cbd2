//! Native on-disk model/tokenizer fetch-and-cache. Grounded on the
//! teacher's `model_loader.rs`: same cache-then-fetch-then-verify shape,
//! same SHA256 integrity check and bounded-retry backoff, same
//! same-origin/allowlist URL validation — translated from the browser's
//! `fetch`+IndexedDB pair to a local cache directory plus
//! `reqwest::blocking` (the same crate the teacher's own `build.rs` already
//! uses for model downloads), since this crate now runs inside the CLI/MCP
//! process rather than behind a wasm-bindgen boundary.

pub use crate::bert::Model;
use crate::EmbedError;
use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn_ndarray::NdArrayDevice;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const MODEL_ID: &str = "arctic-embed-s-q8-ab3e129ef864";
const MODEL_CACHE_FILE: &str = "arctic-embed-s-q8-ab3e129ef864.bin";
const MODEL_SHA256: &str = "ab3e129ef864f1cffaef41c6557b171ed610017bc3c3bfc5c6709448df493338";
const MODEL_URL_DEFAULT: &str =
    "https://huggingface.co/Snowflake/snowflake-arctic-embed-s/resolve/main/model.bin";
const MAX_MODEL_BYTES: usize = 80 * 1024 * 1024;

const TOKENIZER_CACHE_FILE: &str = "arctic-embed-s-tokenizer-v1.json";
const TOKENIZER_SHA256: &str = "91f1def9b9391fdabe028cd3f3fcc4efd34e5d1f08c3bf2de513ebb5911a1854";
const TOKENIZER_URL_DEFAULT: &str =
    "https://huggingface.co/Snowflake/snowflake-arctic-embed-s/resolve/main/tokenizer.json";
const MAX_TOKENIZER_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_ORIGINS: [&str; 2] = ["https://cdn.jsdelivr.net/", "https://huggingface.co/"];
const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_FETCH_RETRIES: u32 = 3;

static LAST_FETCH: Mutex<Option<HashMap<String, Instant>>> = Mutex::new(None);

/// `~/.cache/ctxd/models` (or the platform cache-dir equivalent via `dirs`).
pub fn cache_dir() -> PathBuf {
    std::env::var("CTXD_MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ctxd")
                .join("models")
        })
}

pub fn load_model_cpu(device: &NdArrayDevice) -> Result<Model<burn_ndarray::NdArray>, EmbedError> {
    let bytes = fetch_model_bytes()?;
    model_from_bytes(&bytes, device)
}

pub fn load_tokenizer_bytes() -> Result<Vec<u8>, EmbedError> {
    let url =
        std::env::var("CTXD_TOKENIZER_URL").unwrap_or_else(|_| TOKENIZER_URL_DEFAULT.to_string());
    fetch_with_cache(&url, TOKENIZER_CACHE_FILE, TOKENIZER_SHA256, MAX_TOKENIZER_BYTES)
}

fn model_from_bytes<B: burn::tensor::backend::Backend>(
    bytes: &[u8],
    device: &B::Device,
) -> Result<Model<B>, EmbedError> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings, Vec<u8>>::default();
    let record: <Model<B> as Module<B>>::Record = recorder
        .load(bytes.to_vec(), device)
        .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
    Ok(Model::new(device).load_record(record))
}

fn fetch_model_bytes() -> Result<Vec<u8>, EmbedError> {
    let url = std::env::var("CTXD_EMBEDDING_MODEL_URL").unwrap_or_else(|_| MODEL_URL_DEFAULT.to_string());
    fetch_with_cache(&url, MODEL_CACHE_FILE, MODEL_SHA256, MAX_MODEL_BYTES)
}

/// Cache-then-fetch-then-verify, mirroring the teacher's IndexedDB path:
/// a cache hit whose SHA256 still matches is returned as-is; a corrupt
/// cache entry is evicted and re-fetched; a fresh fetch is retried with
/// bounded exponential backoff and persisted to disk on success.
fn fetch_with_cache(
    url: &str,
    cache_file: &str,
    expected_sha256: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, EmbedError> {
    let dir = cache_dir();
    let path = dir.join(cache_file);

    if let Ok(bytes) = std::fs::read(&path) {
        if verify_sha256(&bytes, expected_sha256) {
            return Ok(bytes);
        }
        let _ = std::fs::remove_file(&path);
    }

    validate_url_origin(url)?;
    enforce_rate_limit(cache_file)?;

    let bytes = fetch_with_retry(url, expected_sha256, max_bytes)?;

    std::fs::create_dir_all(&dir).map_err(|e| EmbedError::Cache(e.to_string()))?;
    std::fs::write(&path, &bytes).map_err(|e| EmbedError::Cache(e.to_string()))?;
    Ok(bytes)
}

fn validate_url_origin(url: &str) -> Result<(), EmbedError> {
    if url.starts_with("file://") || url.starts_with('/') || url.starts_with("./") {
        return Ok(());
    }
    if ALLOWED_ORIGINS.iter().any(|origin| url.starts_with(origin)) {
        Ok(())
    } else {
        Err(EmbedError::InvalidOrigin(url.to_string()))
    }
}

fn enforce_rate_limit(key: &str) -> Result<(), EmbedError> {
    let now = Instant::now();
    let mut guard = LAST_FETCH.lock().expect("fetch-rate mutex poisoned");
    let map = guard.get_or_insert_with(HashMap::new);
    if let Some(last) = map.get(key) {
        if now.duration_since(*last) < MIN_FETCH_INTERVAL {
            return Err(EmbedError::RateLimited(key.to_string()));
        }
    }
    map.insert(key.to_string(), now);
    Ok(())
}

fn fetch_with_retry(url: &str, expected_sha256: &str, max_bytes: usize) -> Result<Vec<u8>, EmbedError> {
    let mut attempt = 0u32;
    loop {
        match try_fetch(url, expected_sha256, max_bytes) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempt < MAX_FETCH_RETRIES => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(500 * 2u64.pow(attempt)));
                tracing::warn!(url, attempt, error = %err, "retrying model fetch");
            }
            Err(err) => return Err(err),
        }
    }
}

fn try_fetch(url: &str, expected_sha256: &str, max_bytes: usize) -> Result<Vec<u8>, EmbedError> {
    let response = reqwest::blocking::get(url).map_err(|e| EmbedError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(EmbedError::Network(format!("HTTP {}", response.status())));
    }
    if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        if content_type.to_str().unwrap_or("").to_ascii_lowercase().contains("text/html") {
            return Err(EmbedError::Network("unexpected text/html response".to_string()));
        }
    }
    let bytes = response.bytes().map_err(|e| EmbedError::Network(e.to_string()))?;
    if bytes.len() > max_bytes {
        return Err(EmbedError::Network("response exceeds size limit".to_string()));
    }
    if !verify_sha256(&bytes, expected_sha256) {
        return Err(EmbedError::Integrity);
    }
    Ok(bytes.to_vec())
}

fn verify_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest).eq_ignore_ascii_case(expected_hex)
}
