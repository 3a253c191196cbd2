//! Refresh Orchestrator (C7, §4.7). No direct teacher counterpart — the
//! teacher's handlers are synchronous one-shot calls with no lease, no
//! progress stream, no cancellation. Built on `tokio`, grounded on the
//! teacher's `bin/mcp_server.rs` (mutex-guarded shared state,
//! `tracing`-instrumented async handlers) and the `cocode-rs` change
//! detector's `spawn_blocking` wrapping of blocking catalog I/O.
//!
//! Drives Walker -> Merkle -> Catalog.plan -> per-sub-index dispatch in the
//! fixed order `{chunks, embeddings, lexical}`, holding a single-holder
//! refresh lease, emitting strictly non-decreasing progress on an `mpsc`
//! channel, and honoring cooperative cancellation between sub-index phases.

use crate::catalog::CatalogStore;
use crate::chunk::chunk_file;
use crate::chunk_store::ChunkStore;
use crate::config::IndexConfig;
use crate::embed::{embed_all, EmbeddingProvider, EmbeddingStore};
use crate::error::{Error, Result};
use crate::lexical::LexicalIndex;
use crate::merkle::MerkleTree;
use crate::model::{
    ArtifactKind, CatalogPlan, EmbeddingRecord, EmbeddingSpaceId, IngestOptions, IngestWarning,
    MarkKind, MerkleLeaf, PlanItem, Progress, RefreshStatus, Tag,
};
use crate::util::{sha256_hex, HeuristicTokenCounter, TokenCounter};
use crate::walker::{walk, FileMap, WalkLimits};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One refresh invocation's target: a tracked directory on a logical branch,
/// plus where its derived index state lives on disk.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub dir: String,
    pub branch: String,
    pub root: PathBuf,
    pub storage_root: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub files_walked: usize,
    pub leaves_added: usize,
    pub leaves_removed: usize,
    pub warnings: Vec<IngestWarning>,
}

/// Drives the full indexing pipeline. Holds the process-wide refresh lease
/// and the catalog handle; constructed once at startup and shared by
/// reference, never as a global singleton (§9 REDESIGN FLAGS).
pub struct Orchestrator {
    catalog: CatalogStore,
    provider: Arc<dyn EmbeddingProvider>,
    counter: Arc<dyn TokenCounter>,
    lease: Arc<Mutex<()>>,
    config: IndexConfig,
}

impl Orchestrator {
    pub fn new(catalog: CatalogStore, provider: Arc<dyn EmbeddingProvider>, config: IndexConfig) -> Self {
        Self {
            catalog,
            provider,
            counter: Arc::new(HeuristicTokenCounter),
            lease: Arc::new(Mutex::new(())),
            config,
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Runs one refresh to completion. Only one refresh may hold the lease at
    /// a time (§5: "a single-holder `tokio::sync::Mutex<()>` guard held only
    /// by refresh; retrieval never acquires it").
    #[tracing::instrument(skip(self, progress, cancel), fields(dir = %request.dir, branch = %request.branch))]
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        progress: mpsc::Sender<Progress>,
        cancel: CancellationToken,
    ) -> Result<RefreshSummary> {
        let _guard = match self.lease.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                send(&progress, 0.0, "refresh already in progress", RefreshStatus::Paused, Vec::new()).await;
                return Ok(RefreshSummary::default());
            }
        };
        let ingest_options = IngestOptions::default();

        send(&progress, 0.0, "walking workspace", RefreshStatus::Indexing, Vec::new()).await;
        let limits = WalkLimits::default();
        let (files, _walk_stats) = walk(&request.root, &limits)?;
        let files_walked = files.len();

        if cancel.is_cancelled() {
            send(&progress, 0.0, "cancelled before indexing began", RefreshStatus::Failed, Vec::new()).await;
            return Err(Error::Cancelled);
        }

        fn read_and_hash_for(root: PathBuf) -> impl Fn(&str) -> Result<String> + Send + Sync + 'static {
            move |path: &str| -> Result<String> {
                let data = std::fs::read(path).map_err(|source| Error::WalkIo {
                    root: root.display().to_string(),
                    source,
                })?;
                Ok(sha256_hex(&data))
            }
        }

        let mut warnings = Vec::new();
        let mut chunk_store = ChunkStore::load(&request.storage_root)?;

        // Phase 1/3: chunks.
        send(&progress, 0.05, "planning chunk updates", RefreshStatus::Indexing, Vec::new()).await;
        let chunks_tag = Tag::new(request.dir.clone(), request.branch.clone(), ArtifactKind::Chunks);
        let chunks_plan = self
            .catalog
            .plan(chunks_tag.clone(), files.clone(), read_and_hash_for(request.root.clone()))
            .await?;

        self.apply_chunks_phase(&chunks_plan, &mut chunk_store, &ingest_options, &mut warnings)?;
        chunk_store.save(&request.storage_root)?;
        self.commit_plan(&chunks_plan, MarkKind::Compute).await?;
        self.commit_plan(&chunks_plan, MarkKind::AddTag).await?;
        self.commit_plan(&chunks_plan, MarkKind::RemoveTag).await?;
        self.commit_plan(&chunks_plan, MarkKind::Del).await?;
        self.commit_plan(&chunks_plan, MarkKind::UpdateLastUpdated).await?;

        let (leaves_added, leaves_removed) = self.update_merkle_tree(&request, &chunks_tag, &chunks_plan)?;

        send(&progress, 0.5, "planning embedding updates", RefreshStatus::Indexing, warnings.clone()).await;
        if cancel.is_cancelled() {
            send(&progress, 0.5, "cancelled after chunk phase", RefreshStatus::Failed, warnings.clone()).await;
            return Err(Error::Cancelled);
        }

        // Phase 2/3: embeddings.
        let embeddings_tag = Tag::new(request.dir.clone(), request.branch.clone(), ArtifactKind::Embeddings);
        let embeddings_plan = self
            .catalog
            .plan(embeddings_tag.clone(), files.clone(), read_and_hash_for(request.root.clone()))
            .await?;
        self.apply_embeddings_phase(&embeddings_plan, &chunk_store, &request.storage_root).await?;
        self.commit_plan(&embeddings_plan, MarkKind::Compute).await?;
        self.commit_plan(&embeddings_plan, MarkKind::AddTag).await?;
        self.commit_plan(&embeddings_plan, MarkKind::RemoveTag).await?;
        self.commit_plan(&embeddings_plan, MarkKind::Del).await?;
        self.commit_plan(&embeddings_plan, MarkKind::UpdateLastUpdated).await?;

        send(&progress, 0.8, "planning lexical updates", RefreshStatus::Indexing, warnings.clone()).await;
        if cancel.is_cancelled() {
            send(&progress, 0.8, "cancelled after embedding phase", RefreshStatus::Failed, warnings.clone()).await;
            return Err(Error::Cancelled);
        }

        // Phase 3/3: lexical.
        let lexical_tag = Tag::new(request.dir.clone(), request.branch.clone(), ArtifactKind::Lexical);
        let lexical_plan = self
            .catalog
            .plan(lexical_tag.clone(), files.clone(), read_and_hash_for(request.root.clone()))
            .await?;
        self.apply_lexical_phase(&lexical_plan, &chunk_store, &request.storage_root, &lexical_tag)?;
        self.commit_plan(&lexical_plan, MarkKind::Compute).await?;
        self.commit_plan(&lexical_plan, MarkKind::AddTag).await?;
        self.commit_plan(&lexical_plan, MarkKind::RemoveTag).await?;
        self.commit_plan(&lexical_plan, MarkKind::Del).await?;
        self.commit_plan(&lexical_plan, MarkKind::UpdateLastUpdated).await?;

        send(&progress, 1.0, "refresh complete", RefreshStatus::Done, warnings.clone()).await;

        Ok(RefreshSummary {
            files_walked,
            leaves_added,
            leaves_removed,
            warnings,
        })
    }

    fn apply_chunks_phase(
        &self,
        plan: &CatalogPlan,
        chunk_store: &mut ChunkStore,
        ingest_options: &IngestOptions,
        warnings: &mut Vec<IngestWarning>,
    ) -> Result<()> {
        for item in plan.compute.iter().chain(plan.add_tag.iter()) {
            if chunk_store.get(&item.cache_key).is_some() {
                continue;
            }
            let text = match std::fs::read_to_string(&item.path) {
                Ok(text) => text,
                Err(e) => {
                    warnings.push(IngestWarning {
                        path: item.path.clone(),
                        code: "utf8".to_string(),
                        message: format!("failed to read as UTF-8: {e}"),
                    });
                    continue;
                }
            };
            if text.len() > ingest_options.max_file_bytes {
                warnings.push(IngestWarning {
                    path: item.path.clone(),
                    code: "max_file_bytes".to_string(),
                    message: "file grew past the size limit mid-refresh; skipped".to_string(),
                });
                continue;
            }
            match chunk_file(&item.path, &text, &item.cache_key, ingest_options, self.counter.as_ref()) {
                crate::model::ChunkOutcome::Ok(mut chunks) => {
                    if chunks.len() > ingest_options.max_chunks_per_file {
                        warnings.push(IngestWarning {
                            path: item.path.clone(),
                            code: "max_chunks_per_file".to_string(),
                            message: "chunk limit exceeded; file truncated".to_string(),
                        });
                        chunks.truncate(ingest_options.max_chunks_per_file);
                    }
                    chunk_store.upsert(&item.cache_key, chunks);
                }
                crate::model::ChunkOutcome::Fallback => {
                    warnings.push(IngestWarning {
                        path: item.path.clone(),
                        code: "chunk_fallback_exhausted".to_string(),
                        message: "no chunker strategy accepted this file".to_string(),
                    });
                }
                crate::model::ChunkOutcome::Fatal(err) => {
                    warnings.push(IngestWarning {
                        path: item.path.clone(),
                        code: "chunk_fatal".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        for item in &plan.del {
            chunk_store.remove(&item.cache_key);
        }
        Ok(())
    }

    async fn apply_embeddings_phase(
        &self,
        plan: &CatalogPlan,
        chunk_store: &ChunkStore,
        storage_root: &std::path::Path,
    ) -> Result<()> {
        if plan.compute.is_empty() && plan.del.is_empty() {
            return Ok(());
        }
        let space = EmbeddingSpaceId {
            provider_id: self.provider.provider_id().to_string(),
            model: self.provider.model().to_string(),
            dim: self.provider.dim(),
        };
        let mut store = EmbeddingStore::load(storage_root, space)?;

        for item in &plan.compute {
            if store.has_cache_key(&item.cache_key) {
                continue;
            }
            let Some(chunks) = chunk_store.get(&item.cache_key) else {
                continue;
            };
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embed_all(self.provider.as_ref(), &texts, self.config.max_retries).await?;
            for (chunk, vector) in chunks.iter().zip(vectors) {
                store.upsert(EmbeddingRecord {
                    cache_key: item.cache_key.clone(),
                    chunk_index: chunk.index,
                    vector,
                });
            }
        }
        for item in &plan.del {
            store.remove_cache_key(&item.cache_key);
        }
        store.save(storage_root)?;
        Ok(())
    }

    fn apply_lexical_phase(
        &self,
        plan: &CatalogPlan,
        chunk_store: &ChunkStore,
        storage_root: &std::path::Path,
        tag: &Tag,
    ) -> Result<()> {
        if plan.compute.is_empty() && plan.del.is_empty() {
            return Ok(());
        }
        let mut index = LexicalIndex::load(storage_root, tag)?;
        for item in &plan.compute {
            if let Some(chunks) = chunk_store.get(&item.cache_key) {
                index.index_chunks(&item.cache_key, chunks);
            }
        }
        for item in &plan.del {
            index.remove_file(&item.cache_key);
        }
        index.save(storage_root, tag)?;
        Ok(())
    }

    async fn commit_plan(&self, plan: &CatalogPlan, kind: MarkKind) -> Result<()> {
        let items: Vec<PlanItem> = match kind {
            MarkKind::Compute => plan.compute.clone(),
            MarkKind::AddTag => plan.add_tag.clone(),
            MarkKind::RemoveTag => plan.remove_tag.clone(),
            MarkKind::Del => plan.del.clone(),
            MarkKind::UpdateLastUpdated => plan.stale.clone(),
        };
        self.catalog.mark_complete(items, kind).await
    }

    /// Persists the Chunks artifact's Merkle tree (C2) from the catalog
    /// plan's surviving `(path, cacheKey)` pairs, and returns the diff size
    /// against the previously persisted tree for the progress summary.
    fn update_merkle_tree(
        &self,
        request: &RefreshRequest,
        tag: &Tag,
        plan: &CatalogPlan,
    ) -> Result<(usize, usize)> {
        let path = request
            .storage_root
            .join("index")
            .join("tags")
            .join(tag.escaped_dir())
            .join(&tag.branch)
            .join(tag.artifact_kind.as_str())
            .join("merkle_tree");

        let previous = MerkleTree::load(&path)?;
        let leaves: Vec<MerkleLeaf> = plan
            .compute
            .iter()
            .chain(plan.add_tag.iter())
            .chain(plan.stale.iter())
            .map(|item| MerkleLeaf {
                path: item.path.clone(),
                cache_key: item.cache_key.clone(),
            })
            .collect();
        let current = MerkleTree::build(leaves);
        let (added, removed) = MerkleTree::diff(&previous, &current);
        current.save(&path)?;
        Ok((added.len(), removed.len()))
    }
}

async fn send(
    tx: &mpsc::Sender<Progress>,
    progress: f32,
    description: &str,
    status: RefreshStatus,
    warnings: Vec<IngestWarning>,
) {
    let _ = tx
        .send(Progress {
            progress,
            description: description.to_string(),
            status,
            warnings,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::embed::HashingProvider;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingProvider::new(16))
    }

    async fn run_refresh(orchestrator: &Orchestrator, request: RefreshRequest) -> RefreshSummary {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let orchestrator_catalog = orchestrator.catalog.clone();
            let provider = orchestrator.provider.clone();
            let config = orchestrator.config.clone();
            let orchestrator = Orchestrator::new(orchestrator_catalog, provider, config);
            async move { orchestrator.refresh(request, tx, cancel).await }
        });
        while rx.recv().await.is_some() {}
        handle.await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn empty_workspace_refresh_produces_no_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(catalog, provider(), IndexConfig::default());

        let request = RefreshRequest {
            dir: "ws".into(),
            branch: "main".into(),
            root: dir.path().to_path_buf(),
            storage_root: storage.path().to_path_buf(),
        };
        let summary = run_refresh(&orchestrator, request).await;
        assert_eq!(summary.files_walked, 0);
        assert!(summary.warnings.is_empty());
    }

    #[tokio::test]
    async fn single_file_add_produces_chunks_embeddings_and_lexical_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
        let storage = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(catalog, provider(), IndexConfig::default());

        let request = RefreshRequest {
            dir: "ws".into(),
            branch: "main".into(),
            root: dir.path().to_path_buf(),
            storage_root: storage.path().to_path_buf(),
        };
        let summary = run_refresh(&orchestrator, request).await;
        assert_eq!(summary.files_walked, 1);
        assert_eq!(summary.leaves_added, 1);

        let chunk_store = ChunkStore::load(storage.path()).unwrap();
        assert_eq!(chunk_store.len(), 1);

        let lexical_tag = Tag::new("ws", "main", ArtifactKind::Lexical);
        let lexical = LexicalIndex::load(storage.path(), &lexical_tag).unwrap();
        assert_eq!(lexical.doc_count(), 1);
    }
}
