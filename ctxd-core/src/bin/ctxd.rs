//! ctxd CLI - incremental codebase indexing and hybrid search
//!
//! A thin wrapper around `ctxd_core`'s Orchestrator/RetrievalPipeline for
//! human and agent use. Grounded on `llmx`'s CLI (`bin/llmx.rs`):
//! subcommand layout, `--json` dual output, auto-detecting the workspace
//! from the current directory rather than requiring an explicit id.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctxd_core::rerank::NoopReranker;
use ctxd_core::{
    ArtifactKind, CatalogStore, ChunkKind, HybridStrategy, IndexConfig, Orchestrator,
    RefreshRequest, RetrievalPipeline, SearchFilters, Tag,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ctxd", version, about = "Incremental codebase indexing and hybrid search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON format (for agents)
    #[arg(long, global = true)]
    json: bool,

    /// Logical branch this workspace is indexed under (default: "main")
    #[arg(long, global = true, default_value = "main")]
    branch: String,

    /// Override storage directory (default: ~/.ctxd/index)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a directory and refresh its chunks/embeddings/lexical sub-indexes
    Refresh {
        /// Directory to index
        path: PathBuf,
    },

    /// Hybrid vector + lexical search over an indexed directory
    Search {
        /// Directory previously refreshed
        path: PathBuf,

        /// Search query
        query: String,

        /// Maximum number of results (default: 5)
        #[arg(long, default_value = "5")]
        limit: usize,

        /// Filter by path prefix
        #[arg(long)]
        filter_path: Option<String>,

        /// Filter by chunk kind (markdown, structural, text, html, json, image)
        #[arg(long)]
        kind: Option<String>,

        /// Fusion strategy: rrf or linear (default: linear)
        #[arg(long, default_value = "linear")]
        strategy: String,

        /// Disable the reranking stage
        #[arg(long)]
        no_rerank: bool,
    },

    /// List every tracked tag (dir, branch, artifactKind)
    List,

    /// Resolve a file's imports to their definitions
    ImportDefs {
        /// File whose imports should be resolved
        path: PathBuf,
    },
}

fn storage_root(cli: &Cli) -> PathBuf {
    cli.storage_dir.clone().unwrap_or_else(|| {
        dirs::home_dir().expect("could not find home directory").join(".ctxd").join("index")
    })
}

fn workspace_dir(path: &std::path::Path) -> Result<String> {
    Ok(path.canonicalize().context("could not canonicalize path")?.to_string_lossy().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let storage = storage_root(&cli);
    let catalog = CatalogStore::open(&storage.join("index.sqlite"))?;

    match &cli.command {
        Commands::Refresh { path } => cmd_refresh(&cli, catalog, &storage, path).await,
        Commands::Search { path, query, limit, filter_path, kind, strategy, no_rerank } => {
            cmd_search(&cli, catalog, &storage, path, query, *limit, filter_path, kind, strategy, *no_rerank).await
        }
        Commands::List => cmd_list(&cli, catalog).await,
        Commands::ImportDefs { path } => cmd_import_defs(&cli, path).await,
    }
}

async fn cmd_refresh(cli: &Cli, catalog: CatalogStore, storage: &std::path::Path, path: &PathBuf) -> Result<()> {
    let start = Instant::now();
    let dir = workspace_dir(path)?;
    let config = IndexConfig::default();
    let provider = ctxd_core::embed::build_provider(&config.embeddings_provider);
    let orchestrator = Orchestrator::new(catalog, provider, config);

    let request = RefreshRequest {
        dir: dir.clone(),
        branch: cli.branch.clone(),
        root: path.clone(),
        storage_root: storage.to_path_buf(),
    };

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let progress_task = tokio::spawn(async move {
        let mut last = Vec::new();
        while let Some(update) = rx.recv().await {
            last = update.warnings.clone();
            eprintln!("[{:>5.1}%] {}", update.progress * 100.0, update.description);
        }
        last
    });

    let summary = orchestrator.refresh(request, tx, cancel).await?;
    let warnings = progress_task.await.unwrap_or_default();
    let elapsed = start.elapsed();

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "dir": dir,
                "branch": cli.branch,
                "files_walked": summary.files_walked,
                "leaves_added": summary.leaves_added,
                "leaves_removed": summary.leaves_removed,
                "warnings": summary.warnings,
                "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
            })
        );
    } else {
        println!(
            "Refreshed {} ({} files, +{}/-{} leaves) in {:.1}ms",
            dir,
            summary.files_walked,
            summary.leaves_added,
            summary.leaves_removed,
            elapsed.as_secs_f64() * 1000.0
        );
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in &warnings {
                println!("  - {} ({}): {}", w.path, w.code, w.message);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_search(
    cli: &Cli,
    catalog: CatalogStore,
    storage: &std::path::Path,
    path: &PathBuf,
    query: &str,
    limit: usize,
    filter_path: &Option<String>,
    kind: &Option<String>,
    strategy: &str,
    no_rerank: bool,
) -> Result<()> {
    let start = Instant::now();
    let dir = workspace_dir(path)?;

    let mut config = IndexConfig::default();
    config.retrieval.n_final = limit;
    if no_rerank {
        config.retrieval.use_reranking = false;
    }
    let provider = ctxd_core::embed::build_provider(&config.embeddings_provider);

    let pipeline = RetrievalPipeline::new(catalog, provider, Arc::new(NoopReranker), config.retrieval, storage.to_path_buf());

    let filters = SearchFilters {
        path_prefix: filter_path.clone(),
        kind: kind.as_deref().and_then(parse_chunk_kind),
        heading_prefix: None,
        symbol_prefix: None,
    };

    let strategy = match strategy {
        "rrf" => HybridStrategy::Rrf,
        _ => HybridStrategy::Linear,
    };

    let results = pipeline.retrieve(&dir, &cli.branch, query, &filters, strategy).await?;
    let elapsed = start.elapsed();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Found {} results in {:.1}ms\n", results.len(), elapsed.as_secs_f64() * 1000.0);
        for (i, item) in results.iter().enumerate() {
            println!("[{}] {}:{}-{} (score: {:.3})", i + 1, item.filepath, item.start_line, item.end_line, item.score);
            println!("    ───────────────────────────────────");
            for line in item.content.lines().take(10) {
                println!("    {}", line);
            }
            if item.content.lines().count() > 10 {
                println!("    ...");
            }
            println!("    ───────────────────────────────────\n");
        }
    }
    Ok(())
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

async fn cmd_list(cli: &Cli, catalog: CatalogStore) -> Result<()> {
    let tags = catalog.list_tags().await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else if tags.is_empty() {
        println!("No indexed tags found. Run `ctxd refresh <path>` to create one.");
    } else {
        for tag in &tags {
            println!("{} @ {} [{}]", tag.dir, tag.branch, tag_kind_label(&tag.artifact_kind));
        }
    }
    Ok(())
}

fn tag_kind_label(kind: &ArtifactKind) -> &'static str {
    kind.as_str()
}

async fn cmd_import_defs(cli: &Cli, path: &PathBuf) -> Result<()> {
    let workspace_dirs = vec![workspace_dir(
        path.parent().unwrap_or(std::path::Path::new(".")),
    )?];
    let ide = Arc::new(ctxd_core::ide::LocalCollaborator::new(workspace_dirs));
    let resolver = ctxd_core::import_defs::ImportResolver::new(ide);

    let path_str = path.to_string_lossy().to_string();
    let resolved = resolver.resolve_for_file(&path_str).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else if resolved.is_empty() {
        println!("No recognized imports in {}", path_str);
    } else {
        for entry in &resolved {
            println!("{} <- {}", entry.symbol.name, entry.symbol.source_module);
            for loc in &entry.locations {
                println!("    {}:{}-{}", loc.path, loc.start_line, loc.end_line);
            }
            if entry.locations.is_empty() {
                println!("    (no definition resolved)");
            }
        }
    }
    Ok(())
}
