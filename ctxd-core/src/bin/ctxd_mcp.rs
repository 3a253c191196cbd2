//! MCP server exposing the refresh/search/list/import-defs operations over
//! stdio. Grounded on `llmx`'s `bin/mcp_server.rs`: a `#[tool_router]` impl
//! wrapping a shared, async-mutex-guarded handle (`tokio::sync::Mutex`, so
//! a panicked holder simply leaves the next lock waiting rather than
//! poisoning it), operation errors mapped to `McpError::internal_error`,
//! JSON-pretty-printed tool output, and a `tracing_subscriber` stderr
//! writer so stdout stays clean for the stdio transport.

use anyhow::Result;
use ctxd_core::rerank::NoopReranker;
use ctxd_core::{
    CatalogStore, ChunkKind, HybridStrategy, IndexConfig, Orchestrator, RefreshRequest,
    RetrievalPipeline, SearchFilters, Tag,
};
use rmcp::handler::server::{router::tool::ToolRouter, tool::Parameters};
use rmcp::model::{ErrorData as McpError, *};
use rmcp::{tool, tool_handler, tool_router, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, JsonSchema)]
struct RefreshInput {
    /// Absolute or relative path to the workspace root to index
    path: String,
    /// Logical branch this workspace is indexed under (default: "main")
    #[serde(default = "default_branch")]
    branch: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchInput {
    /// Workspace root previously passed to ctxd_refresh
    path: String,
    /// Natural-language search query
    query: String,
    #[serde(default = "default_branch")]
    branch: String,
    /// Maximum number of results to return (default: 5)
    #[serde(default = "default_limit")]
    limit: usize,
    /// Restrict results to paths under this prefix
    #[serde(default)]
    filter_path: Option<String>,
    /// Restrict results to a chunk kind (markdown, structural, text, html, json, image)
    #[serde(default)]
    kind: Option<String>,
    /// Disable the LLM reranking stage and return stage-3 fused order
    #[serde(default)]
    no_rerank: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImportDefsInput {
    /// File whose import statements should be resolved to definitions
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListInput {}

fn default_branch() -> String {
    "main".to_string()
}

fn default_limit() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct RefreshOutput {
    dir: String,
    branch: String,
    files_walked: usize,
    leaves_added: usize,
    leaves_removed: usize,
    warnings: usize,
}

/// Shared state behind the tool router: the catalog handle and the storage
/// root artifacts are read from/written under. Mirrors the teacher's
/// `IndexStore` role but delegates to `CatalogStore`/`Orchestrator`/
/// `RetrievalPipeline` instead of an in-memory `IndexFile` cache.
struct CtxdState {
    storage_root: PathBuf,
}

impl CtxdState {
    fn catalog(&self) -> ctxd_core::Result<CatalogStore> {
        CatalogStore::open(&self.storage_root.join("index.sqlite"))
    }
}

fn workspace_dir(path: &str) -> Result<String> {
    let canon = std::path::Path::new(path).canonicalize()?;
    Ok(canon.to_string_lossy().to_string())
}

fn parse_chunk_kind(s: &str) -> Option<ChunkKind> {
    match s {
        "markdown" => Some(ChunkKind::Markdown),
        "json" => Some(ChunkKind::Json),
        "structural" => Some(ChunkKind::Structural),
        "html" => Some(ChunkKind::Html),
        "text" => Some(ChunkKind::Text),
        "image" => Some(ChunkKind::Image),
        _ => None,
    }
}

#[derive(Clone)]
struct CtxdServer {
    state: Arc<Mutex<CtxdState>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CtxdServer {
    fn new(state: Arc<Mutex<CtxdState>>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    /// Walk a workspace and refresh its chunk/embedding/lexical sub-indexes
    #[tool(description = "Walk a workspace directory and refresh its chunks/embeddings/lexical sub-indexes")]
    async fn ctxd_refresh(
        &self,
        Parameters(input): Parameters<RefreshInput>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let catalog = state
            .catalog()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let storage_root = state.storage_root.clone();
        drop(state);

        let root = PathBuf::from(&input.path);
        let dir = workspace_dir(&input.path)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        let config = IndexConfig::default();
        let provider = ctxd_core::embed::build_provider(&config.embeddings_provider);
        let orchestrator = Orchestrator::new(catalog, provider, config);

        let request = RefreshRequest {
            dir: dir.clone(),
            branch: input.branch.clone(),
            root,
            storage_root,
        };

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let summary = orchestrator
            .refresh(request, tx, cancel)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let _ = drain.await;

        let output = RefreshOutput {
            dir,
            branch: input.branch,
            files_walked: summary.files_walked,
            leaves_added: summary.leaves_added,
            leaves_removed: summary.leaves_removed,
            warnings: summary.warnings.len(),
        };
        let content = serde_json::to_string_pretty(&output)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(content)]))
    }

    /// Hybrid vector + lexical search over a previously refreshed workspace
    #[tool(description = "Hybrid vector + lexical search over a refreshed workspace, returning ranked context items")]
    async fn ctxd_search(
        &self,
        Parameters(input): Parameters<SearchInput>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let catalog = state
            .catalog()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let storage_root = state.storage_root.clone();
        drop(state);

        let dir = workspace_dir(&input.path)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        let mut config = IndexConfig::default();
        config.retrieval.n_final = input.limit;
        if input.no_rerank {
            config.retrieval.use_reranking = false;
        }
        let provider = ctxd_core::embed::build_provider(&config.embeddings_provider);

        let pipeline = RetrievalPipeline::new(
            catalog,
            provider,
            Arc::new(NoopReranker),
            config.retrieval,
            storage_root,
        );

        let filters = SearchFilters {
            path_prefix: input.filter_path,
            kind: input.kind.as_deref().and_then(parse_chunk_kind),
            heading_prefix: None,
            symbol_prefix: None,
        };

        let results = pipeline
            .retrieve(&dir, &input.branch, &input.query, &filters, HybridStrategy::Linear)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        let content = serde_json::to_string_pretty(&results)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(content)]))
    }

    /// Resolve a file's imports to their definition locations
    #[tool(description = "Parse a file's imports and resolve each to its definition location via the IDE collaborator")]
    async fn ctxd_import_defs(
        &self,
        Parameters(input): Parameters<ImportDefsInput>,
    ) -> Result<CallToolResult, McpError> {
        let path = PathBuf::from(&input.path);
        let workspace_dirs = vec![workspace_dir(
            path.parent().unwrap_or(std::path::Path::new(".")).to_str().unwrap_or("."),
        )
        .map_err(|e| McpError::invalid_params(e.to_string(), None))?];
        let ide = Arc::new(ctxd_core::ide::LocalCollaborator::new(workspace_dirs));
        let resolver = ctxd_core::import_defs::ImportResolver::new(ide);

        let resolved = resolver
            .resolve_for_file(&input.path)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        let content = serde_json::to_string_pretty(&resolved)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(content)]))
    }

    /// List every tracked tag (directory, branch, artifact kind)
    #[tool(description = "List every tracked (directory, branch, artifactKind) tag currently in the catalog")]
    async fn ctxd_list(
        &self,
        Parameters(_input): Parameters<ListInput>,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let catalog = state
            .catalog()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        drop(state);

        let tags: Vec<Tag> = catalog
            .list_tags()
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let content = serde_json::to_string_pretty(&tags)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(content)]))
    }
}

#[tool_handler]
impl ServerHandler for CtxdServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ctxd-mcp".to_string(),
                version: "0.1.0".to_string(),
            },
            instructions: Some(
                "Incremental, content-addressed codebase index with hybrid semantic/lexical \
                 retrieval. Call ctxd_refresh on a workspace before searching it; ctxd_search \
                 returns ranked context items; ctxd_import_defs resolves a file's imports; \
                 ctxd_list shows tracked tags."
                    .to_string(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ctxd_mcp=info".parse()?),
        )
        .init();

    let storage_root = env::var("CTXD_STORAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap().join(".ctxd").join("index"));
    std::fs::create_dir_all(&storage_root)?;

    tracing::info!("Starting ctxd MCP server, storage: {:?}", storage_root);

    let state = CtxdState { storage_root };
    let server = CtxdServer::new(Arc::new(Mutex::new(state)));

    tracing::info!("Server ready, listening on stdio");
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
