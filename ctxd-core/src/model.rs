use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `artifactKind` component of a [`Tag`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Chunks,
    Embeddings,
    Lexical,
    GlobalCache,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Chunks => "chunks",
            ArtifactKind::Embeddings => "embeddings",
            ArtifactKind::Lexical => "lexical",
            ArtifactKind::GlobalCache => "globalCache",
        }
    }
}

/// `(directory, branch, artifactKind)` — uniquely identifies an index
/// partition. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub dir: String,
    pub branch: String,
    pub artifact_kind: ArtifactKind,
}

impl Tag {
    pub fn new(dir: impl Into<String>, branch: impl Into<String>, artifact_kind: ArtifactKind) -> Self {
        Self {
            dir: dir.into(),
            branch: branch.into(),
            artifact_kind,
        }
    }

    /// Filesystem-safe escape of `dir` for use under `index/tags/<...>`.
    pub fn escaped_dir(&self) -> String {
        crate::util::slugify(&self.dir)
    }
}

/// One row staged by [`crate::catalog::CatalogStore::plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub tag: Tag,
    pub path: String,
    pub cache_key: String,
}

/// Output of the four-way (five-way, counting `stale`) catalog planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogPlan {
    pub compute: Vec<PlanItem>,
    pub del: Vec<PlanItem>,
    pub add_tag: Vec<PlanItem>,
    pub remove_tag: Vec<PlanItem>,
    /// `updateLastUpdated`-only rows: content unchanged, freshness timestamp bumped.
    pub stale: Vec<PlanItem>,
}

impl CatalogPlan {
    pub fn is_empty(&self) -> bool {
        self.compute.is_empty()
            && self.del.is_empty()
            && self.add_tag.is_empty()
            && self.remove_tag.is_empty()
            && self.stale.is_empty()
    }
}

/// The operation kind passed to `markComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Compute,
    AddTag,
    RemoveTag,
    Del,
    UpdateLastUpdated,
}

/// `(tag, path, cacheKey, lastUpdated)` as persisted in `tag_catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCatalogEntry {
    pub tag: Tag,
    pub path: String,
    pub cache_key: String,
    pub last_updated: i64,
}

/// `(cacheKey, tag)` as persisted in `global_cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCacheEntry {
    pub cache_key: String,
    pub tag: Tag,
}

/// Options governing a refresh's chunking/size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    pub chunk_target_chars: usize,
    pub chunk_max_chars: usize,
    pub max_file_bytes: usize,
    pub max_total_bytes: usize,
    pub max_chunks_per_file: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_target_chars: 4_000,
            chunk_max_chars: 8_000,
            max_file_bytes: 10 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
            max_chunks_per_file: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Markdown,
    Json,
    Structural,
    Html,
    Text,
    Image,
    Unknown,
}

/// A bounded excerpt of a file with line range and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Content hash of the file this chunk was cut from (= `cacheKey`).
    pub digest: String,
    /// 0-based, contiguous within `digest`.
    pub index: usize,
    pub filepath: String,
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub token_estimate: usize,
    pub heading_path: Vec<String>,
    pub symbol: Option<String>,
    pub slug: String,
}

/// The chunker's result shape: an explicit variant rather than exceptions.
#[derive(Debug)]
pub enum ChunkOutcome {
    Ok(Vec<Chunk>),
    /// This strategy cannot handle the input; try the next one.
    Fallback,
    Fatal(crate::error::Error),
}

/// A fixed-dimension embedding vector tied to a chunk, plus the identity of
/// the provider+model that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub cache_key: String,
    pub chunk_index: usize,
    pub vector: Vec<f32>,
}

/// Identifies one embedding sub-index: different dimensions require
/// separate indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmbeddingSpaceId {
    pub provider_id: String,
    pub model: String,
    pub dim: usize,
}

impl EmbeddingSpaceId {
    pub fn store_dir_name(&self) -> String {
        format!("{}__{}__{}", self.provider_id, self.model, self.dim)
    }
}

/// A leaf of the Merkle tree: `(path, cacheKey)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct MerkleLeaf {
    pub path: String,
    pub cache_key: String,
}

/// Fusion strategy for the Retrieval Pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HybridStrategy {
    /// Reciprocal Rank Fusion, `k=60`.
    Rrf,
    /// Weighted linear combination of normalized cosine/BM25/recency scores.
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchFilters {
    pub path_prefix: Option<String>,
    pub kind: Option<ChunkKind>,
    pub heading_prefix: Option<String>,
    pub symbol_prefix: Option<String>,
}

/// One ranked context item returned by the Retrieval Pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub filepath: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub kind: ChunkKind,
    pub bytes: usize,
    pub sha256: String,
    pub line_count: usize,
    #[serde(default)]
    pub mtime_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub cache_key: String,
    pub chunk_index: usize,
    pub tf: usize,
    pub doc_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TermEntry {
    pub df: usize,
    pub postings: Vec<Posting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub avg_chunk_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestWarning {
    pub path: String,
    pub code: String,
    pub message: String,
}

/// Streaming status of a refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Indexing,
    Paused,
    Done,
    Failed,
}

/// One update emitted on the refresh `Progress` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Strictly non-decreasing within one refresh.
    pub progress: f32,
    pub description: String,
    pub status: RefreshStatus,
    #[serde(default)]
    pub warnings: Vec<IngestWarning>,
}

pub type ChunkRefs = BTreeMap<String, String>;

/// A location in a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefinitionLocation {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// One import statement parsed from an active file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportedSymbol {
    pub name: String,
    pub source_module: String,
}

/// An import resolved to zero or more definition locations, plus the source
/// read from the target range. Cached by the Import-Definitions Service's
/// LRU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedImport {
    pub symbol: ImportedSymbol,
    pub locations: Vec<DefinitionLocation>,
    pub snippet: Option<String>,
}
