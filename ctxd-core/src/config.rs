//! Typed configuration surface (§6 "Configuration options"). Parsing a
//! config *file* is explicitly out of scope for the core (the spec's
//! non-goal), but the typed structs + defaults a front-end reads from an
//! already-parsed value are not — ambient concerns survive Non-goals
//! (SPEC_FULL.md §9 ambient-stack note). Callers (the CLI, the MCP server,
//! tests) construct these directly or via `serde` from a `toml`/JSON value
//! they parsed themselves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// `contextProvider.nRetrieve`
    pub n_retrieve: usize,
    /// `contextProvider.nFinal`
    pub n_final: usize,
    /// `contextProvider.useReranking`
    pub use_reranking: bool,
    /// Fusion weights (§4.8 step 3): cosine, bm25, recency.
    pub alpha_cosine: f32,
    pub beta_bm25: f32,
    pub gamma_recency: f32,
    /// §4.8 step 4: "expand its line range by a small margin" — lines added
    /// on each side of the winning chunk's range during per-file dedupe.
    pub line_margin: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_retrieve: 25,
            n_final: 5,
            use_reranking: true,
            alpha_cosine: 0.6,
            beta_bm25: 0.3,
            gamma_recency: 0.1,
            line_margin: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsProviderConfig {
    pub provider: String,
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub max_chunk_size: usize,
    /// §5: "per-provider request timeout configurable (default 10s for embeddings)"
    pub request_timeout_secs: u64,
    /// §5: "the Orchestrator limits parallel in-flight batches per provider to a configured value (default 4)"
    pub max_in_flight_batches: usize,
}

impl Default for EmbeddingsProviderConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "hash-v1".to_string(),
            api_base: None,
            api_key: None,
            max_chunk_size: 512,
            request_timeout_secs: 10,
            max_in_flight_batches: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub name: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// §5: "30s for reranker"
    pub request_timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            name: None,
            model: None,
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub retrieval: RetrievalConfig,
    pub embeddings_provider: EmbeddingsProviderConfig,
    pub reranker: RerankerConfig,
    /// `disableInFiles`: glob patterns to skip for both retrieval and indexing.
    pub disable_in_files: Vec<String>,
    /// Maximum bounded-retry count before a provider batch is failed (§5).
    pub max_retries: u32,
}

impl IndexConfig {
    pub fn matches_disabled(&self, path: &str) -> bool {
        self.disable_in_files.iter().any(|pat| {
            glob_match::glob_match(pat, path)
        })
    }
}

/// Minimal glob matcher used only for `disableInFiles`. The crate depends on
/// the `ignore`/`globset` family transitively for the walker; rather than
/// pull in a second glob engine for this one config knob we do a small
/// `*`/`**` match here.
mod glob_match {
    pub fn glob_match(pattern: &str, text: &str) -> bool {
        globset::Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(text))
            .unwrap_or(false)
    }
}
