//! Indexer — configuration, the file watcher and the staged pipeline that
//! turns a repository into a collection.

pub mod pipeline;
pub mod progress;
pub mod service;
pub mod watcher;

pub use pipeline::{run_pipeline, PipelineStats};
pub use progress::{ProgressSnapshot, SyncProgress};
pub use service::IndexerService;
pub use watcher::{start_watcher, IndexTask};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::search::FusionConfig;

/// mnemo configuration from `.mnemo/config.toml`. Unknown top-level options
/// are an error, not a warning.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct MnemoConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub guardrails: crate::plan::PlanGuardrailConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    10877
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Extra ignore patterns appended after the project layer.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Parser worker count; defaults to CPUs − 1.
    #[serde(default)]
    pub parallel_workers: Option<usize>,
    /// Soft memory ceiling polled per batch.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    /// Per-file parse budget.
    #[serde(default = "default_parse_timeout_secs")]
    pub parse_timeout_secs: u64,
}

fn default_memory_limit_mb() -> usize {
    2048
}
fn default_parse_timeout_secs() -> u64 {
    30
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            parallel_workers: None,
            memory_limit_mb: default_memory_limit_mb(),
            parse_timeout_secs: default_parse_timeout_secs(),
        }
    }
}

impl IndexerConfig {
    pub fn worker_count(&self) -> usize {
        self.parallel_workers
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// fastembed model enum variant.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Cache directory for model files.
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Embedder worker threads (clamped to the CPU count).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_embedding_model() -> String {
    "BGESmallENV15".to_string()
}
fn default_pool_size() -> usize {
    2
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: None,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Token ceiling for one tool response.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: usize,
}

fn default_max_response_tokens() -> usize {
    25_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

/// Load configuration from `<root>/.mnemo/config.toml`. A missing file is
/// the defaults; a malformed file is an error the operator has to fix.
pub fn load_config(root: &Path) -> anyhow::Result<MnemoConfig> {
    let config_path = root.join(".mnemo").join("config.toml");
    if !config_path.exists() {
        return Ok(MnemoConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("malformed {}: {}", config_path.display(), e))?;
    Ok(config)
}

/// On-disk layout of one collection's persistent state.
#[derive(Debug, Clone)]
pub struct CollectionPaths {
    pub data_dir: PathBuf,
    pub collection_dir: PathBuf,
}

impl CollectionPaths {
    /// `MNEMO_DATA_DIR` overrides the default `<root>/.mnemo` location.
    pub fn resolve(root: &Path, collection: &str) -> Self {
        let data_dir = std::env::var("MNEMO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(".mnemo"));
        let collection_dir = data_dir.join("collections").join(collection);
        Self {
            data_dir,
            collection_dir,
        }
    }

    pub fn state_db(&self) -> PathBuf {
        self.collection_dir.join("state.db")
    }

    pub fn lance_dir(&self) -> PathBuf {
        self.collection_dir.join("lance")
    }

    pub fn mirror_file(&self) -> PathBuf {
        self.collection_dir.join("manual_mirror.json")
    }

    pub fn bm25_snapshot(&self) -> PathBuf {
        self.collection_dir.join("bm25_snapshot.json")
    }

    #[allow(dead_code)]
    pub fn revisions_dir(&self) -> PathBuf {
        self.collection_dir.join("revisions")
    }
}
