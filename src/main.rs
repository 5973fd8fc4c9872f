#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod cache;
mod discovery;
mod embedder;
mod error;
mod error_recovery;
mod hooks;
mod indexer;
mod models;
mod parsers;
mod plan;
mod resource_limits;
mod search;
mod server;
mod storage;
mod tickets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use embedder::local::FastembedPool;
use embedder::Embedder;
use indexer::{load_config, IndexTask, MnemoConfig, SyncProgress};
use plan::{AutoRevisionEngine, GuardrailEngine, MemorySearch, PlanContext};
use server::handlers::common::ToolContext;
use server::{DaemonState, serve_stdio, serve_tcp};

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Semantic code memory daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the retrieval server (indexes incrementally on startup)
    Serve {
        /// Listen port for TCP mode
        #[arg(long)]
        port: Option<u16>,
        /// Speak JSON-RPC over stdio instead of TCP
        #[arg(long)]
        stdio: bool,
        /// Watch the tree and re-index on changes
        #[arg(long, default_value_t = true)]
        watch: bool,
    },

    /// Index the repository into the collection
    Index {
        /// Full rebuild instead of incremental
        #[arg(long)]
        full: bool,
        /// With --full: also drop all derived entities first
        #[arg(long)]
        clear: bool,
        /// Drop and rebuild the store collection, then full rebuild
        #[arg(long)]
        recreate: bool,
        /// Index a single file only
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Search the collection from the command line
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// semantic | keyword | hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// Show collection status
    Status,

    /// Validate (and optionally auto-revise) an implementation plan
    PlanCheck {
        /// Plan JSON file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Run only the fast rules
        #[arg(long)]
        fast: bool,
        /// Apply auto-revisions and print the revised plan
        #[arg(long)]
        revise: bool,
        /// Wire the duplicate rule to the collection's knowledge base
        #[arg(long)]
        with_memory: bool,
    },

    /// Hooks: read one event record from stdin, honour the deadline,
    /// fail open
    Hook {
        #[command(subcommand)]
        hook: HookCommands,
    },
}

#[derive(Subcommand)]
enum HookCommands {
    SessionStart,
    Prompt,
    PreTool,
    PostTool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Hooks log to stderr; stdout carries the hook payload.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Serve { port, stdio, watch } => cmd_serve(root, port, stdio, watch).await,
        Commands::Index {
            full,
            clear,
            recreate,
            path,
        } => cmd_index(root, full, clear, recreate, path).await,
        Commands::Search { query, limit, mode } => cmd_search(root, query, limit, mode).await,
        Commands::Status => cmd_status(root).await,
        Commands::PlanCheck {
            file,
            fast,
            revise,
            with_memory,
        } => cmd_plan_check(root, file, fast, revise, with_memory).await,
        Commands::Hook { hook } => cmd_hook(hook).await,
    }
}

/// Provider selection via `MNEMO_EMBEDDER`. Only the local fastembed
/// provider ships today; `MNEMO_EMBED_API_KEY` is reserved for remote
/// providers. Unknown selectors are an error, not a silent fallback.
fn build_embedder(config: &MnemoConfig) -> Result<Embedder> {
    let selector = std::env::var("MNEMO_EMBEDDER").unwrap_or_else(|_| "local".to_string());
    match selector.as_str() {
        "local" | "fastembed" => {
            let pool = FastembedPool::with_config(config.embedding.pool_size, &config.embedding)?;
            Ok(Embedder::new(Arc::new(pool)))
        }
        other => anyhow::bail!(
            "unknown embedding provider '{}' in MNEMO_EMBEDDER (supported: local)",
            other
        ),
    }
}

async fn build_state(root: PathBuf) -> Result<Arc<DaemonState>> {
    let config = load_config(&root)?;
    let embedder = build_embedder(&config)?;
    Ok(Arc::new(DaemonState::new(root, config, embedder)))
}

async fn cmd_serve(root: PathBuf, port: Option<u16>, stdio: bool, watch: bool) -> Result<()> {
    let state = build_state(root.clone()).await?;
    let service = state.default_service().await?;

    // Startup sync so queries have something to hit.
    let progress = state.sync_progress.clone();
    let cancel = state.shutdown.clone();
    {
        let service = service.clone();
        let metrics = state.metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match service.incremental(Some(progress), cancel).await {
                Ok(stats) => metrics.record_sync(stats.files_indexed),
                Err(e) => tracing::error!("startup index failed: {}", e),
            }
        });
    }

    if watch {
        let (task_tx, task_rx) = tokio::sync::mpsc::channel::<IndexTask>(256);
        let ignores = state.config.indexer.ignore.clone();
        tokio::spawn(indexer::start_watcher(
            root.clone(),
            task_tx,
            ignores,
            state.shutdown.clone(),
        ));
        let worker = (*service).clone();
        tokio::spawn(worker.run(task_rx));
    }

    if stdio {
        serve_stdio(state).await
    } else {
        let port = port.unwrap_or(state.config.server.port);
        serve_tcp(state, port).await
    }
}

async fn cmd_index(
    root: PathBuf,
    full: bool,
    clear: bool,
    recreate: bool,
    path: Option<PathBuf>,
) -> Result<()> {
    let state = build_state(root.clone()).await?;
    let service = state.default_service().await?;

    if let Some(path) = path {
        let absolute = if path.is_absolute() { path } else { root.join(path) };
        if absolute.exists() {
            service.index_file(&absolute).await?;
        } else {
            service.delete_file(&absolute).await?;
        }
        return Ok(());
    }

    let progress = Arc::new(SyncProgress::new());
    let cancel = state.shutdown.clone();
    let reporter = spawn_progress_reporter(progress.clone());

    let stats = if recreate {
        service.recreate(Some(progress.clone()), cancel).await?
    } else if full {
        service.full(clear, Some(progress.clone()), cancel).await?
    } else {
        service.incremental(Some(progress.clone()), cancel).await?
    };
    reporter.abort();

    println!(
        "indexed {} file(s), skipped {} unchanged, embedded {} chunk(s) ({} cache hits)",
        stats.files_indexed, stats.files_skipped, stats.chunks_embedded, stats.embed_cache_hits
    );
    Ok(())
}

/// Progress line for long runs — operators can watch a run succeed past
/// skipped files.
fn spawn_progress_reporter(progress: Arc<SyncProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let snap = progress.snapshot();
            if !snap.active {
                continue;
            }
            tracing::info!(
                "progress: {}/{} files, {:.1} files/s, {} chunks embedded, rss {} MB, tier {:?}, eta {:.0}s",
                snap.files_scanned,
                snap.files_total,
                snap.files_per_second,
                snap.chunks_embedded,
                snap.memory_rss_bytes / (1024 * 1024),
                snap.current_tier.unwrap_or("-"),
                snap.eta_seconds,
            );
        }
    })
}

async fn cmd_search(root: PathBuf, query: String, limit: usize, mode: String) -> Result<()> {
    let state = build_state(root).await?;
    let service = state.default_service().await?;
    let ctx = ToolContext {
        state: state.clone(),
        service,
    };
    let args = serde_json::json!({
        "query": query,
        "limit": limit,
        "mode": mode,
    });
    let envelope = server::tools::dispatch("search_similar", args, &ctx).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

async fn cmd_status(root: PathBuf) -> Result<()> {
    let state = build_state(root).await?;
    let service = state.default_service().await?;
    let ctx = ToolContext {
        state: state.clone(),
        service,
    };
    let envelope = server::tools::dispatch("status", serde_json::Value::Null, &ctx).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Bridge from the synchronous rule contract to the async retrieval
/// stack: rules run on blocking threads, so block_on is safe here.
struct ServiceMemory {
    service: Arc<indexer::IndexerService>,
    handle: tokio::runtime::Handle,
}

impl MemorySearch for ServiceMemory {
    fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let service = self.service.clone();
        let query = query.to_string();
        self.handle.block_on(async move {
            let snapshot = {
                let bm25 = service.bm25();
                let guard = bm25.lock().await;
                guard.snapshot()
            };
            let ranked = snapshot.search(&query, limit);
            let store = service.store();
            let store = store.lock().await;
            let mut out = Vec::new();
            for (doc_id, score) in ranked {
                if let Ok(Some(entity)) = store.get(&doc_id).await {
                    // squash bm25 scores into a 0..1 similarity
                    out.push((entity.qualified_name, (score as f64 / 10.0).min(1.0)));
                }
            }
            out
        })
    }
}

async fn cmd_plan_check(
    root: PathBuf,
    file: Option<PathBuf>,
    fast: bool,
    revise: bool,
    with_memory: bool,
) -> Result<()> {
    let config = load_config(&root)?;
    let plan_json = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read plan file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            buffer
        }
    };
    let plan: models::ImplementationPlan =
        serde_json::from_str(&plan_json).context("plan JSON is malformed")?;

    let engine = GuardrailEngine::with_default_catalog(config.guardrails.clone());
    let mut ctx = PlanContext::new(plan.clone(), config.guardrails.clone());

    if with_memory {
        let embedder = build_embedder(&config)?;
        let state = Arc::new(DaemonState::new(root, config.clone(), embedder));
        let service = state.default_service().await?;
        ctx = ctx.with_memory(Arc::new(ServiceMemory {
            service,
            handle: tokio::runtime::Handle::current(),
        }));
    }

    let result = if fast {
        engine.validate_fast(&ctx).await
    } else {
        engine.validate(&ctx).await
    };

    if !revise {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let reviser = AutoRevisionEngine::new(config.guardrails.clone());
    let revised = reviser.revise_plan(&plan, &result.findings);
    eprintln!("{}", revised.format_audit_trail());
    println!("{}", serde_json::to_string_pretty(&revised.revised_plan)?);
    Ok(())
}

async fn cmd_hook(hook: HookCommands) -> Result<()> {
    let mut input = String::new();
    // Hooks tolerate an unreadable stdin: fail open with an empty event.
    if tokio::io::stdin().read_to_string(&mut input).await.is_err() {
        input.clear();
    }

    let outcome = match hook {
        HookCommands::SessionStart => hooks::session_start::run(&input).await,
        HookCommands::Prompt => hooks::prompt::run(&input).await,
        HookCommands::PreTool => hooks::pre_tool::run(&input).await,
        HookCommands::PostTool => hooks::post_tool::run(&input).await,
    };

    if !outcome.stdout.is_empty() {
        println!("{}", outcome.stdout);
    }
    use std::io::Write;
    let _ = std::io::stdout().flush();
    std::process::exit(outcome.exit_code);
}
