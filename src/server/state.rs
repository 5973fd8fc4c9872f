//! Daemon state — per-collection services, lock-free metrics and the
//! process-wide plan-mode flag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::embedder::Embedder;
use crate::error_recovery::CircuitBreaker;
use crate::indexer::{IndexerService, MnemoConfig, SyncProgress};
use crate::models::collection_name;
use crate::resource_limits::RequestGate;
use crate::tickets::TicketGateway;

/// Process-wide plan-mode flag: read-only state that blocks write tools.
/// Seeded from the environment at start, toggled via `set_plan_mode`.
pub struct PlanModeFlag {
    active: AtomicBool,
}

impl PlanModeFlag {
    pub fn from_env() -> Self {
        let active = std::env::var("PLAN_MODE")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        if active {
            tracing::info!("plan mode enabled from environment");
        }
        Self {
            active: AtomicBool::new(active),
        }
    }

    #[allow(dead_code)]
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

/// `true|1|yes|on`, case-insensitive.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Lock-free runtime metrics.
pub struct DaemonMetrics {
    pub queries_served: AtomicUsize,
    pub query_latency_us: AtomicUsize,
    pub total_files_indexed: AtomicUsize,
    pub syncs_completed: AtomicUsize,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self {
            queries_served: AtomicUsize::new(0),
            query_latency_us: AtomicUsize::new(0),
            total_files_indexed: AtomicUsize::new(0),
            syncs_completed: AtomicUsize::new(0),
        }
    }

    pub fn record_query(&self, latency_us: usize) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        self.query_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn record_sync(&self, files: usize) {
        self.total_files_indexed.fetch_add(files, Ordering::Relaxed);
        self.syncs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let queries = self.queries_served.load(Ordering::Relaxed);
        let latency_total = self.query_latency_us.load(Ordering::Relaxed);
        let avg = if queries > 0 { latency_total / queries } else { 0 };
        serde_json::json!({
            "queries_served": queries,
            "avg_query_latency_us": avg,
            "total_files_indexed": self.total_files_indexed.load(Ordering::Relaxed),
            "syncs_completed": self.syncs_completed.load(Ordering::Relaxed),
        })
    }
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global daemon state — lives for the daemon process lifetime.
pub struct DaemonState {
    pub root: PathBuf,
    pub default_collection: String,
    pub config: MnemoConfig,
    pub embedder: Embedder,
    /// Per-collection services, opened lazily and never replaced after.
    services: RwLock<HashMap<String, Arc<IndexerService>>>,
    pub plan_mode: Arc<PlanModeFlag>,
    pub metrics: Arc<DaemonMetrics>,
    pub response_cache: Arc<ResponseCache>,
    pub request_gate: Arc<RequestGate>,
    pub embedding_circuit: Arc<CircuitBreaker>,
    pub vector_circuit: Arc<CircuitBreaker>,
    pub tickets: Arc<TicketGateway>,
    pub sync_progress: Arc<SyncProgress>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl DaemonState {
    pub fn new(root: PathBuf, config: MnemoConfig, embedder: Embedder) -> Self {
        let default_collection = std::env::var("MNEMO_COLLECTION")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                collection_name(
                    &root
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "default".to_string()),
                )
            });

        Self {
            root,
            default_collection,
            config,
            embedder,
            services: RwLock::new(HashMap::new()),
            plan_mode: Arc::new(PlanModeFlag::from_env()),
            metrics: Arc::new(DaemonMetrics::new()),
            response_cache: Arc::new(ResponseCache::new()),
            request_gate: Arc::new(RequestGate::default()),
            embedding_circuit: Arc::new(CircuitBreaker::new(
                5,
                2,
                std::time::Duration::from_secs(30),
            )),
            vector_circuit: Arc::new(CircuitBreaker::new(
                5,
                2,
                std::time::Duration::from_secs(30),
            )),
            tickets: Arc::new(TicketGateway::unconfigured()),
            sync_progress: Arc::new(SyncProgress::new()),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Seam for wiring a concrete tracker client (external collaborator).
    #[allow(dead_code)]
    pub fn with_tickets(mut self, tickets: Arc<TicketGateway>) -> Self {
        self.tickets = tickets;
        self
    }

    /// Get or lazily open the service for a collection. The sanitised name
    /// is the namespace key.
    pub async fn service(&self, collection: &str) -> Result<Arc<IndexerService>> {
        let name = collection_name(collection);
        {
            let services = self.services.read().await;
            if let Some(service) = services.get(&name) {
                return Ok(service.clone());
            }
        }

        let service = Arc::new(
            IndexerService::open(&self.root, &name, self.config.clone(), self.embedder.clone())
                .await?,
        );
        let mut services = self.services.write().await;
        Ok(services.entry(name).or_insert(service).clone())
    }

    pub async fn default_service(&self) -> Result<Arc<IndexerService>> {
        self.service(&self.default_collection.clone()).await
    }
}
