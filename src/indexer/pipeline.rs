//! Staged indexing pipeline: Scanner → Parser Pool → Batcher → Embedder →
//! Writer, connected by bounded tokio::mpsc channels with backpressure.
//!
//! Embedding and store writes run on single dispatcher stages so provider
//! and store ordering stay sane; batches themselves are pipelined (batch
//! N+1 embeds while batch N is written).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::progress::SyncProgress;
use super::MnemoConfig;
use crate::discovery;
use crate::embedder::{BatchRamp, Embedder};
use crate::models::{Entity, EntityType, FileTier};
use crate::parsers::{self, ParseRequest};
use crate::search::Bm25Index;
use crate::storage::{FileState, StateDb, VectorStore};

// ---------------------------------------------------------------------------
// Message types between pipeline stages
// ---------------------------------------------------------------------------

/// Scanner → Parser
struct ScannedFile {
    rel_path: String,
    content: Arc<String>,
    hash: String,
    tier: FileTier,
}

/// Parser → Batcher; one fully parsed file, relations already rendered as
/// payload rows so the writer sees a flat entity list.
pub(crate) struct ParsedFile {
    pub rel_path: String,
    pub hash: String,
    pub entities: Vec<Entity>,
}

/// Batcher → Embedder → Writer. Whole files only, so a cancelled run never
/// leaves a half-recorded file.
struct FileBatch {
    files: Vec<ParsedFile>,
    bytes: usize,
}

const CHANNEL_SCAN: usize = 256;
const CHANNEL_PARSE: usize = 128;
const CHANNEL_BATCH: usize = 16;
const BATCH_MAX_FILES: usize = 24;
const BATCH_MAX_BYTES: usize = 512 * 1024;
const BATCH_TIMEOUT_MS: u64 = 50;
const MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024;
/// Outstanding bytes between batcher and writer before the parser pool is
/// throttled.
const OUTSTANDING_BYTES_WATERMARK: usize = 8 * 1024 * 1024;

#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_embedded: usize,
    pub embed_cache_hits: usize,
}

/// Tracks bytes handed to the embed/write stages but not yet committed.
struct Backpressure {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl Backpressure {
    fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    async fn acquire(&self, bytes: usize) {
        while self.outstanding.load(Ordering::Acquire) > OUTSTANDING_BYTES_WATERMARK {
            self.notify.notified().await;
        }
        self.outstanding.fetch_add(bytes, Ordering::AcqRel);
    }

    fn release(&self, bytes: usize) {
        self.outstanding.fetch_sub(bytes, Ordering::AcqRel);
        self.notify.notify_waiters();
    }
}

/// Run the full pipeline for one collection. Only fully committed file
/// batches end up in IndexerState; cancellation is observed at every stage
/// boundary.
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    root: &Path,
    collection: &str,
    config: &MnemoConfig,
    state: StateDb,
    store: Arc<Mutex<VectorStore>>,
    bm25: Arc<Mutex<Bm25Index>>,
    embedder: Embedder,
    progress: Option<Arc<SyncProgress>>,
    cancel: CancellationToken,
) -> Result<PipelineStats> {
    let num_workers = config.indexer.worker_count();
    tracing::info!("pipeline: {} parser worker(s)", num_workers);

    if let Some(ref p) = progress {
        p.reset();
    }

    let existing: HashMap<String, String> = state
        .all_file_states()
        .await?
        .into_iter()
        .map(|s| (s.source_path, s.content_hash))
        .collect();

    let (scan_tx, scan_rx) = mpsc::channel::<ScannedFile>(CHANNEL_SCAN);
    let (parse_tx, parse_rx) = mpsc::channel::<ParsedFile>(CHANNEL_PARSE);
    let (batch_tx, batch_rx) = mpsc::channel::<FileBatch>(CHANNEL_BATCH);

    let scan_rx = Arc::new(Mutex::new(scan_rx));
    let backpressure = Arc::new(Backpressure::new());
    let stats = Arc::new(Mutex::new(PipelineStats::default()));

    // --- Scanner ---
    let root_owned = root.to_path_buf();
    let extra_ignores = config.indexer.ignore.clone();
    let prog_scanner = progress.clone();
    let cancel_scanner = cancel.clone();
    let stats_scanner = stats.clone();
    let h_scanner = tokio::spawn(async move {
        scanner_stage(
            root_owned,
            extra_ignores,
            existing,
            scan_tx,
            prog_scanner,
            cancel_scanner,
            stats_scanner,
        )
        .await;
    });

    // --- Parser workers ---
    let parse_timeout = Duration::from_secs(config.indexer.parse_timeout_secs);
    let mut h_parsers: Vec<JoinHandle<()>> = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let rx = scan_rx.clone();
        let tx = parse_tx.clone();
        let prog = progress.clone();
        let cancel = cancel.clone();
        let collection = collection.to_string();
        h_parsers.push(tokio::spawn(async move {
            parser_worker(rx, tx, collection, parse_timeout, prog, cancel).await;
        }));
    }
    drop(parse_tx); // only worker clones hold senders now

    // --- Batcher ---
    let bp_batcher = backpressure.clone();
    let cancel_batcher = cancel.clone();
    let h_batcher = tokio::spawn(async move {
        batcher_stage(parse_rx, batch_tx, bp_batcher, cancel_batcher).await;
    });

    // --- Embed + write dispatcher ---
    let memory_limit = config.indexer.memory_limit_mb * 1024 * 1024;
    let stats_writer = stats.clone();
    let h_writer: JoinHandle<Result<()>> = {
        let progress = progress.clone();
        let backpressure = backpressure.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            embed_write_stage(
                batch_rx,
                state,
                store,
                bm25,
                embedder,
                memory_limit,
                progress,
                backpressure,
                cancel,
                stats_writer,
            )
            .await
        })
    };

    let _ = h_scanner.await;
    for handle in h_parsers {
        let _ = handle.await;
    }
    let _ = h_batcher.await;
    h_writer.await??;

    if let Some(ref p) = progress {
        p.finish();
    }

    let stats = stats.lock().await.clone();
    tracing::info!(
        "pipeline complete: {} indexed, {} skipped, {} embedded ({} cache hits)",
        stats.files_indexed,
        stats.files_skipped,
        stats.chunks_embedded,
        stats.embed_cache_hits,
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Stage 1: Scanner — discovery, hashing, skip-unchanged
// ---------------------------------------------------------------------------

async fn scanner_stage(
    root: PathBuf,
    extra_ignores: Vec<String>,
    existing: HashMap<String, String>,
    tx: mpsc::Sender<ScannedFile>,
    progress: Option<Arc<SyncProgress>>,
    cancel: CancellationToken,
    stats: Arc<Mutex<PipelineStats>>,
) {
    let files = discovery::discover(&root, &extra_ignores);
    let total = files.len();
    tracing::info!("scanner: found {} candidate file(s)", total);
    if let Some(ref p) = progress {
        p.files_total.store(total, Ordering::Relaxed);
    }

    let mut sent = 0usize;
    let mut skipped_unchanged = 0usize;
    let mut skipped_errors = 0usize;

    for (path, tier) in files {
        if cancel.is_cancelled() {
            tracing::info!("scanner: cancelled");
            break;
        }

        let rel_path = match path.strip_prefix(&root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("scanner: cannot stat {:?}: {}", path, e);
                skipped_errors += 1;
                continue;
            }
        };
        if metadata.len() > MAX_FILE_SIZE_BYTES {
            tracing::debug!(
                "scanner: skipping {:?} ({} bytes over the {} byte limit)",
                path,
                metadata.len(),
                MAX_FILE_SIZE_BYTES
            );
            skipped_errors += 1;
            continue;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("scanner: cannot read {:?}: {}", path, e);
                skipped_errors += 1;
                continue;
            }
        };

        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        if existing.get(&rel_path) == Some(&hash) {
            skipped_unchanged += 1;
            if let Some(ref p) = progress {
                p.files_scanned.fetch_add(1, Ordering::Relaxed);
            }
            continue;
        }

        // Content can upgrade the tier (deep markers inside the file).
        let tier = match tier {
            FileTier::Light => FileTier::Light,
            _ => discovery::classify_tier(&path, Some(&content)),
        };
        if let Some(ref p) = progress {
            p.set_tier(tier);
        }

        if tx
            .send(ScannedFile {
                rel_path,
                content: Arc::new(content),
                hash,
                tier,
            })
            .await
            .is_err()
        {
            tracing::warn!("scanner: downstream closed, aborting");
            break;
        }
        sent += 1;
        if let Some(ref p) = progress {
            p.files_scanned.fetch_add(1, Ordering::Relaxed);
        }
    }

    {
        let mut s = stats.lock().await;
        s.files_skipped += skipped_unchanged;
    }

    tracing::info!(
        "scanner: {} sent, {} unchanged, {} errors",
        sent,
        skipped_unchanged,
        skipped_errors
    );
}

// ---------------------------------------------------------------------------
// Stage 2: Parser workers — CPU-bound parsing via spawn_blocking + timeout
// ---------------------------------------------------------------------------

async fn parser_worker(
    rx: Arc<Mutex<mpsc::Receiver<ScannedFile>>>,
    tx: mpsc::Sender<ParsedFile>,
    collection: String,
    parse_timeout: Duration,
    progress: Option<Arc<SyncProgress>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        // Lock receiver, grab one message, release immediately.
        let scanned = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(scanned) = scanned else {
            break;
        };

        let collection_for_parse = collection.clone();
        let parse_task = tokio::task::spawn_blocking(move || {
            let req = ParseRequest {
                collection: &collection_for_parse,
                source_path: &scanned.rel_path,
                content: &scanned.content,
                tier: scanned.tier,
            };
            let parsed = match parsers::parse(&req) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("parser: {} failed: {}", scanned.rel_path, e);
                    parsers::ParsedSource::default()
                }
            };
            let mut entities = parsed.entities;
            for relation in &parsed.relations {
                entities.push(relation.to_entity(&collection_for_parse));
            }
            ParsedFile {
                rel_path: scanned.rel_path,
                hash: scanned.hash,
                entities,
            }
        });

        // A timeout fails the file, never the batch.
        let parsed = match tokio::time::timeout(parse_timeout, parse_task).await {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(e)) => {
                tracing::warn!("parser: worker panicked, file skipped: {}", e);
                continue;
            }
            Err(_) => {
                tracing::warn!("parser: parse exceeded {:?}, file skipped", parse_timeout);
                continue;
            }
        };

        if tx.send(parsed).await.is_err() {
            break;
        }
        if let Some(ref p) = progress {
            p.files_parsed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 3: Batcher — whole-file batches with size/timeout flushing
// ---------------------------------------------------------------------------

async fn batcher_stage(
    mut rx: mpsc::Receiver<ParsedFile>,
    tx: mpsc::Sender<FileBatch>,
    backpressure: Arc<Backpressure>,
    cancel: CancellationToken,
) {
    let mut current: Vec<ParsedFile> = Vec::new();
    let mut current_bytes = 0usize;
    let timeout = Duration::from_millis(BATCH_TIMEOUT_MS);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut deadline_active = false;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(file) => {
                        current_bytes += file.entities.iter().map(|e| e.content.len()).sum::<usize>();
                        current.push(file);
                        if !deadline_active {
                            deadline.as_mut().reset(Instant::now() + timeout);
                            deadline_active = true;
                        }
                        if current.len() >= BATCH_MAX_FILES || current_bytes >= BATCH_MAX_BYTES {
                            let batch = FileBatch {
                                files: std::mem::take(&mut current),
                                bytes: std::mem::take(&mut current_bytes),
                            };
                            backpressure.acquire(batch.bytes).await;
                            if tx.send(batch).await.is_err() {
                                return;
                            }
                            deadline_active = false;
                        }
                    }
                    None => {
                        if !current.is_empty() {
                            let batch = FileBatch {
                                files: std::mem::take(&mut current),
                                bytes: current_bytes,
                            };
                            backpressure.acquire(batch.bytes).await;
                            let _ = tx.send(batch).await;
                        }
                        break;
                    }
                }
            }
            _ = &mut deadline, if deadline_active => {
                if !current.is_empty() {
                    let batch = FileBatch {
                        files: std::mem::take(&mut current),
                        bytes: std::mem::take(&mut current_bytes),
                    };
                    backpressure.acquire(batch.bytes).await;
                    if tx.send(batch).await.is_err() {
                        return;
                    }
                }
                deadline_active = false;
            }
            _ = cancel.cancelled() => {
                tracing::info!("batcher: cancelled, dropping {} buffered file(s)", current.len());
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stages 4+5: Embedder + Writer on a single dispatcher
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn embed_write_stage(
    mut rx: mpsc::Receiver<FileBatch>,
    state: StateDb,
    store: Arc<Mutex<VectorStore>>,
    bm25: Arc<Mutex<Bm25Index>>,
    embedder: Embedder,
    memory_limit_bytes: usize,
    progress: Option<Arc<SyncProgress>>,
    backpressure: Arc<Backpressure>,
    cancel: CancellationToken,
    stats: Arc<Mutex<PipelineStats>>,
) -> Result<()> {
    let mut ramp = BatchRamp::new();

    while let Some(mut batch) = rx.recv().await {
        if cancel.is_cancelled() {
            backpressure.release(batch.bytes);
            tracing::info!("writer: cancelled, uncommitted batch dropped");
            break;
        }

        // Memory watermark: above the soft ceiling, halve the next embed
        // batch and nudge the allocator.
        if let Some(rss) = current_rss_bytes() {
            if let Some(ref p) = progress {
                p.memory_rss_bytes.store(rss as usize, Ordering::Relaxed);
            }
            if rss as usize > memory_limit_bytes {
                tracing::warn!(
                    "memory watermark exceeded ({} MB), halving embed batch",
                    rss / (1024 * 1024)
                );
                ramp.halve();
            } else {
                ramp.ramp_up();
            }
        }

        // The indexer checks store health before each batch.
        {
            let store_guard = store.lock().await;
            if let Err(e) = store_guard.health().await {
                backpressure.release(batch.bytes);
                tracing::error!("writer: store unhealthy, stopping run: {}", e);
                return Err(e.into());
            }
        }

        match embed_batch_entities(&embedder, &state, &mut batch, &mut ramp, &stats).await {
            Ok(embedded) => {
                if let Some(ref p) = progress {
                    p.chunks_embedded.fetch_add(embedded, Ordering::Relaxed);
                }
            }
            Err(e) => {
                backpressure.release(batch.bytes);
                tracing::error!("embedder: batch failed, files not committed: {}", e);
                continue;
            }
        }

        // Store write — one upsert per batch.
        let all_entities: Vec<Entity> = batch
            .files
            .iter()
            .flat_map(|f| f.entities.iter().cloned())
            .collect();
        {
            let mut store_guard = store.lock().await;
            if let Err(e) = store_guard.upsert(&all_entities).await {
                backpressure.release(batch.bytes);
                tracing::error!("writer: upsert failed, files not committed: {}", e);
                if matches!(e, crate::storage::vector::VectorStoreError::Corrupt(_)) {
                    return Err(e.into());
                }
                continue;
            }
        }

        // BM25 + IndexerState only after the store write committed.
        {
            let mut bm25_guard = bm25.lock().await;
            for file in &batch.files {
                for entity in &file.entities {
                    if entity.entity_type != EntityType::Relation {
                        bm25_guard.add_document(&entity.id, &entity.content);
                    }
                }
            }
            bm25_guard.publish();
        }

        let now = chrono::Utc::now().timestamp();
        let mut committed = 0usize;
        for file in &batch.files {
            let file_state = FileState {
                source_path: file.rel_path.clone(),
                content_hash: file.hash.clone(),
                last_indexed_at: now,
                entity_ids: file.entities.iter().map(|e| e.id.clone()).collect(),
            };
            if let Err(e) = state.record_file(&file_state).await {
                tracing::error!("writer: state record failed for {}: {}", file.rel_path, e);
                continue;
            }
            committed += 1;
        }

        if let Some(ref p) = progress {
            p.files_written.fetch_add(committed, Ordering::Relaxed);
        }
        {
            let mut s = stats.lock().await;
            s.files_indexed += committed;
        }
        backpressure.release(batch.bytes);
    }

    Ok(())
}

/// Fill in vectors for a batch: relation rows get zero vectors, chunk rows
/// go through the cache and the provider in ramp-sized sub-batches.
async fn embed_batch_entities(
    embedder: &Embedder,
    state: &StateDb,
    batch: &mut FileBatch,
    ramp: &mut BatchRamp,
    stats: &Arc<Mutex<PipelineStats>>,
) -> Result<usize> {
    let dimension = embedder.dimension();

    // Collect (file idx, entity idx) of entities that need provider vectors.
    let mut slots: Vec<(usize, usize)> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    for (fi, file) in batch.files.iter_mut().enumerate() {
        for (ei, entity) in file.entities.iter_mut().enumerate() {
            if entity.entity_type == EntityType::Relation {
                entity.vector = Some(vec![0.0; dimension]);
                continue;
            }
            let content_hash = blake3::hash(entity.content.as_bytes()).to_hex().to_string();
            keys.push(embedder.cache_key(&content_hash));
            slots.push((fi, ei));
        }
    }

    let cached = state.cached_embeddings(&keys).await.unwrap_or_default();
    let mut cache_hits = 0usize;
    let mut to_embed: Vec<usize> = Vec::new(); // indices into slots/keys
    for (i, key) in keys.iter().enumerate() {
        if let Some(vector) = cached.get(key) {
            let (fi, ei) = slots[i];
            batch.files[fi].entities[ei].vector = Some(vector.clone());
            cache_hits += 1;
        } else {
            to_embed.push(i);
        }
    }

    let mut embedded = 0usize;
    let mut cache_entries: Vec<(String, Vec<f32>)> = Vec::new();
    for chunk in to_embed.chunks(ramp.size().max(1)) {
        let texts: Vec<String> = chunk
            .iter()
            .map(|&i| {
                let (fi, ei) = slots[i];
                batch.files[fi].entities[ei].content.clone()
            })
            .collect();
        let vectors = embedder.embed_batch(&texts).await?;
        for (j, &i) in chunk.iter().enumerate() {
            let (fi, ei) = slots[i];
            let entity = &mut batch.files[fi].entities[ei];
            entity.vector = Some(vectors[j].vector.clone());
            if vectors[j].zero_vector {
                entity.observations.push("zero_vector".to_string());
            } else {
                cache_entries.push((keys[i].clone(), vectors[j].vector.clone()));
            }
            embedded += 1;
        }
    }

    if !cache_entries.is_empty() {
        if let Err(e) = state.store_embeddings(&cache_entries).await {
            tracing::warn!("embedding cache store failed (non-fatal): {}", e);
        }
    }

    {
        let mut s = stats.lock().await;
        s.chunks_embedded += embedded;
        s.embed_cache_hits += cache_hits;
    }

    Ok(embedded + cache_hits)
}

/// Current process RSS, polled per batch for the memory watermark.
pub(crate) fn current_rss_bytes() -> Option<u64> {
    let process = psutil::process::Process::new(std::process::id()).ok()?;
    process.memory_info().ok().map(|m| m.rss())
}
