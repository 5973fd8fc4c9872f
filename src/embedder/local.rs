//! Local fastembed provider.
//!
//! ONNX inference is CPU-bound and `TextEmbedding` is not `Sync`, so the
//! provider runs a small pool of dedicated worker threads, each owning one
//! model instance, fed by a bounded job channel. Async callers hand a batch
//! to the channel and await the reply; worker threads never touch the tokio
//! runtime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::{mpsc, oneshot};

use super::{EmbedderError, EmbeddingProvider, Result};
use crate::indexer::EmbeddingConfig;

/// One batch handed to a worker, with the channel to answer on.
struct EmbedJob {
    texts: Vec<String>,
    reply: oneshot::Sender<Result<Vec<Vec<f32>>>>,
}

/// Map a configured model name to its fastembed variant and dimension.
/// Unknown names fall back to the small default with a warning so a typo
/// in config degrades instead of refusing to start.
fn resolve_model(name: &str) -> (EmbeddingModel, usize) {
    match name {
        "BGESmallENV15" | "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "BGEBaseENV15" | "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        other => {
            tracing::warn!(
                "unknown embedding model '{}', using BGESmallENV15",
                other
            );
            (EmbeddingModel::BGESmallENV15, 384)
        }
    }
}

fn model_cache_dir(config: &EmbeddingConfig) -> PathBuf {
    config
        .cache_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("fastembed")
        })
}

pub struct FastembedPool {
    model_name: String,
    dimension: usize,
    workers: usize,
    jobs: mpsc::Sender<EmbedJob>,
    queue_depth: Arc<AtomicUsize>,
}

impl FastembedPool {
    /// Build the model once up front (verifying it loads and downloading
    /// files if needed), then hand it to the first worker and let the
    /// remaining workers build their own copies lazily on their threads.
    pub fn with_config(workers: usize, config: &EmbeddingConfig) -> Result<Self> {
        let workers = workers.clamp(1, num_cpus::get().max(1));
        let (model, dimension) = resolve_model(&config.model);
        let cache_dir = model_cache_dir(config);
        std::fs::create_dir_all(&cache_dir).ok();

        tracing::info!(
            "starting fastembed pool: {} worker(s), model {} ({} dims)",
            workers,
            config.model,
            dimension
        );

        // Load one instance eagerly: it verifies the model (downloading
        // files if needed) and seeds worker 0. The remaining workers load
        // their own copies on their threads so startup is not serialised
        // on N loads.
        let mut first_instance = Some(load_instance(&model, &cache_dir)?);

        let (jobs_tx, jobs_rx) = mpsc::channel::<EmbedJob>(workers * 2);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let queue_depth = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let queue_depth = queue_depth.clone();
            let model = model.clone();
            let cache_dir = cache_dir.clone();
            let preloaded = first_instance.take();
            std::thread::Builder::new()
                .name(format!("fastembed-{}", worker_id))
                .spawn(move || worker_loop(worker_id, preloaded, model, cache_dir, jobs_rx, queue_depth))
                .map_err(|e| EmbedderError::Embedding(anyhow::anyhow!("worker spawn: {}", e)))?;
        }

        Ok(Self {
            model_name: config.model.clone(),
            dimension,
            workers,
            jobs: jobs_tx,
            queue_depth,
        })
    }

    #[allow(dead_code)]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Batches currently queued or in flight.
    #[allow(dead_code)]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

fn load_instance(model: &EmbeddingModel, cache_dir: &PathBuf) -> Result<TextEmbedding> {
    TextEmbedding::try_new(
        InitOptions::new(model.clone())
            .with_cache_dir(cache_dir.clone())
            .with_show_download_progress(false),
    )
    .map_err(EmbedderError::Embedding)
}

/// Worker thread body: own one model instance, drain the shared channel.
/// Holding the receiver lock while parked on `blocking_recv` is fine — a
/// parked worker is exactly the one that should take the next job.
fn worker_loop(
    worker_id: usize,
    preloaded: Option<TextEmbedding>,
    model: EmbeddingModel,
    cache_dir: PathBuf,
    jobs_rx: Arc<Mutex<mpsc::Receiver<EmbedJob>>>,
    queue_depth: Arc<AtomicUsize>,
) {
    let mut instance = match preloaded {
        Some(instance) => instance,
        None => match load_instance(&model, &cache_dir) {
            Ok(instance) => instance,
            Err(e) => {
                // The pool keeps working on the remaining threads.
                tracing::error!("fastembed worker {} failed to load model: {}", worker_id, e);
                return;
            }
        },
    };
    tracing::debug!("fastembed worker {} ready", worker_id);

    loop {
        let job = {
            let Ok(mut rx) = jobs_rx.lock() else {
                return;
            };
            rx.blocking_recv()
        };
        let Some(job) = job else {
            // Sender dropped — the pool is shutting down.
            return;
        };

        let result = instance
            .embed(job.texts, None)
            .map_err(EmbedderError::Embedding);
        queue_depth.fetch_sub(1, Ordering::Relaxed);
        // A dropped reply just means the caller gave up waiting.
        let _ = job.reply.send(result);
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedPool {
    fn name(&self) -> &str {
        "fastembed"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self
            .jobs
            .send(EmbedJob {
                texts,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            self.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(EmbedderError::Embedding(anyhow::anyhow!(
                "embedder workers are gone"
            )));
        }

        reply_rx
            .await
            .map_err(|_| EmbedderError::Embedding(anyhow::anyhow!("embedder worker dropped job")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_known_and_fallback() {
        assert_eq!(resolve_model("BGESmallENV15").1, 384);
        assert_eq!(resolve_model("bge-base-en-v1.5").1, 768);
        assert_eq!(resolve_model("AllMiniLML6V2").1, 384);
        // unknown names degrade to the small default
        assert_eq!(resolve_model("not-a-model").1, 384);
    }

    // Anything below needs the ONNX model on disk; model downloads are not
    // hermetic, so these run behind --ignored.

    #[test]
    #[ignore = "downloads the embedding model"]
    fn test_pool_starts_with_clamped_workers() {
        let config = EmbeddingConfig::default();
        let pool = FastembedPool::with_config(64, &config).unwrap();
        assert!(pool.workers() <= num_cpus::get().max(1));
        assert_eq!(pool.dimension(), 384);
        assert_eq!(pool.model(), "BGESmallENV15");
    }

    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn test_embedding_consistency() {
        let config = EmbeddingConfig::default();
        let pool = FastembedPool::with_config(1, &config).unwrap();
        let a = pool.embed(vec!["same text".into()]).await.unwrap();
        let b = pool.embed(vec!["same text".into()]).await.unwrap();
        for (x, y) in a[0].iter().zip(b[0].iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn test_concurrent_batches_drain() {
        let config = EmbeddingConfig::default();
        let pool = Arc::new(FastembedPool::with_config(2, &config).unwrap());
        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.embed(vec![format!("text {}", i)]).await
            }));
        }
        for handle in handles {
            let vectors = handle.await.unwrap().unwrap();
            assert_eq!(vectors[0].len(), 384);
        }
        assert_eq!(pool.queue_depth(), 0);
    }
}
