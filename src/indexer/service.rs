//! Indexer controller — owns a collection's storage handles and runs the
//! four indexing modes: full rebuild, incremental, single-file and
//! recreate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::pipeline::{self, PipelineStats};
use super::progress::SyncProgress;
use super::watcher::IndexTask;
use super::{CollectionPaths, MnemoConfig};
use crate::embedder::Embedder;
use crate::models::{ChunkKind, Entity, EntityType, Relation};
use crate::parsers::{self, ParseRequest};
use crate::search::Bm25Index;
use crate::storage::{EntityFilter, FileState, ManualMirror, StateDb, VectorStore};

const MANUAL_TYPES: &[EntityType] = &[
    EntityType::DebuggingPattern,
    EntityType::ImplementationPattern,
    EntityType::IntegrationPattern,
    EntityType::ConfigurationPattern,
    EntityType::ArchitecturePattern,
    EntityType::PerformancePattern,
    EntityType::KnowledgeInsight,
    EntityType::ActiveIssue,
    EntityType::Idea,
];

#[derive(Clone)]
pub struct IndexerService {
    root: PathBuf,
    collection: String,
    config: MnemoConfig,
    state: StateDb,
    store: Arc<Mutex<VectorStore>>,
    bm25: Arc<Mutex<Bm25Index>>,
    mirror: Arc<Mutex<ManualMirror>>,
    embedder: Embedder,
    paths: CollectionPaths,
}

impl IndexerService {
    /// Open (or create) a collection's storage and reconcile the manual
    /// mirror into the store.
    pub async fn open(
        root: &Path,
        collection: &str,
        config: MnemoConfig,
        embedder: Embedder,
    ) -> Result<Self> {
        let paths = CollectionPaths::resolve(root, collection);
        tokio::fs::create_dir_all(&paths.collection_dir).await?;

        let state = StateDb::open(&paths.state_db()).await?;
        let store = VectorStore::open(
            paths.lance_dir().to_string_lossy().as_ref(),
            collection,
            embedder.dimension(),
        )
        .await?;
        let bm25 = Bm25Index::load(&paths.bm25_snapshot())?;
        bm25.publish();
        let mirror = ManualMirror::load(&paths.mirror_file())?;

        let service = Self {
            root: root.to_path_buf(),
            collection: collection.to_string(),
            config,
            state,
            store: Arc::new(Mutex::new(store)),
            bm25: Arc::new(Mutex::new(bm25)),
            mirror: Arc::new(Mutex::new(mirror)),
            embedder,
            paths,
        };
        service.reconcile_mirror().await?;
        Ok(service)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &StateDb {
        &self.state
    }

    pub fn store(&self) -> Arc<Mutex<VectorStore>> {
        self.store.clone()
    }

    pub fn bm25(&self) -> Arc<Mutex<Bm25Index>> {
        self.bm25.clone()
    }

    pub fn mirror(&self) -> Arc<Mutex<ManualMirror>> {
        self.mirror.clone()
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Incremental run — the default mode; unchanged files are skipped via
    /// the IndexerState hash map.
    pub async fn incremental(
        &self,
        progress: Option<Arc<SyncProgress>>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        let stats = pipeline::run_pipeline(
            &self.root,
            &self.collection,
            &self.config,
            self.state.clone(),
            self.store.clone(),
            self.bm25.clone(),
            self.embedder.clone(),
            progress,
            cancel.clone(),
        )
        .await?;

        if !cancel.is_cancelled() {
            self.remove_deleted_files().await?;
        }
        self.save_bm25().await;
        Ok(stats)
    }

    /// Full rebuild. With `clear` the collection is recreated first, which
    /// drops all derived entities; manual entities come back from the
    /// mirror.
    pub async fn full(
        &self,
        clear: bool,
        progress: Option<Arc<SyncProgress>>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        if clear {
            self.clear_derived().await?;
        } else {
            // Ignore stored hashes: forget state so every file re-parses.
            self.state.clear_files().await?;
        }
        self.incremental(progress, cancel).await
    }

    /// Drop and rebuild the store collection, then run a full rebuild.
    pub async fn recreate(
        &self,
        progress: Option<Arc<SyncProgress>>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        self.clear_derived().await?;
        self.incremental(progress, cancel).await
    }

    async fn clear_derived(&self) -> Result<()> {
        {
            let mut store = self.store.lock().await;
            store.recreate().await?;
        }
        self.state.clear_files().await?;
        {
            let mut bm25 = self.bm25.lock().await;
            *bm25 = Bm25Index::new();
            bm25.publish();
        }
        self.reconcile_mirror().await?;
        Ok(())
    }

    /// Worker loop for watcher tasks; bounded parallelism so bursts of
    /// events cannot overload embedding.
    pub async fn run(self, mut rx: mpsc::Receiver<IndexTask>) {
        let workers = self.config.indexer.worker_count().min(4);
        tracing::info!("indexer service started with {} worker(s)", workers);
        let semaphore = Arc::new(Semaphore::new(workers));

        while let Some(task) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let service = self.clone();
            tokio::spawn(async move {
                match task {
                    IndexTask::Reindex(path) => {
                        if let Err(e) = service.index_file(&path).await {
                            tracing::error!("failed to index {:?}: {}", path, e);
                        }
                    }
                    IndexTask::Delete(path) => {
                        if let Err(e) = service.delete_file(&path).await {
                            tracing::error!("failed to delete {:?}: {}", path, e);
                        }
                    }
                }
                drop(permit);
            });
        }

        tracing::info!("indexer service stopped");
    }

    /// Index one file through the same parse→embed→write path as the
    /// pipeline (hook-driven single-file mode).
    pub async fn index_file(&self, path: &Path) -> Result<()> {
        let rel_path = self.relative(path);
        let content = tokio::fs::read_to_string(path).await?;
        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();

        if !self.state.needs_reindex(&rel_path, &hash).await? {
            tracing::debug!("skipping {:?} (unchanged)", path);
            return Ok(());
        }
        tracing::info!("indexing {:?}", path);

        let tier = crate::discovery::classify_tier(path, Some(&content));
        let req = ParseRequest {
            collection: &self.collection,
            source_path: &rel_path,
            content: &content,
            tier,
        };
        let parsed = parsers::parse(&req)?;
        let mut entities = parsed.entities;
        for relation in &parsed.relations {
            entities.push(relation.to_entity(&self.collection));
        }

        // Stale entities of a previous version of this file go away first.
        let old_ids = self.state.remove_file(&rel_path).await?;

        self.embed_entities(&mut entities).await?;
        {
            let mut store = self.store.lock().await;
            if !old_ids.is_empty() {
                store.delete(&old_ids).await?;
            }
            store.upsert(&entities).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            for id in &old_ids {
                bm25.remove_document(id);
            }
            for entity in &entities {
                if entity.entity_type != EntityType::Relation {
                    bm25.add_document(&entity.id, &entity.content);
                }
            }
            bm25.publish();
        }

        self.state
            .record_file(&FileState {
                source_path: rel_path,
                content_hash: hash,
                last_indexed_at: chrono::Utc::now().timestamp(),
                entity_ids: entities.iter().map(|e| e.id.clone()).collect(),
            })
            .await?;
        self.save_bm25().await;
        Ok(())
    }

    /// Remove a deleted file's entities everywhere.
    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        let rel_path = self.relative(path);
        let ids = self.state.remove_file(&rel_path).await?;
        if ids.is_empty() {
            return Ok(());
        }
        tracing::info!("removing {} entit(ies) of deleted {:?}", ids.len(), path);
        {
            let store = self.store.lock().await;
            store.delete(&ids).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            for id in &ids {
                bm25.remove_document(id);
            }
            bm25.publish();
        }
        self.save_bm25().await;
        Ok(())
    }

    /// After a run, drop state for files that vanished between runs.
    async fn remove_deleted_files(&self) -> Result<()> {
        for file_state in self.state.all_file_states().await? {
            let abs = self.root.join(&file_state.source_path);
            if !abs.exists() {
                self.delete_file(&abs).await?;
            }
        }
        Ok(())
    }

    /// Re-insert mirror entries missing from the store (startup reconcile
    /// and post-recreate restore).
    pub async fn reconcile_mirror(&self) -> Result<()> {
        let missing = {
            let store = self.store.lock().await;
            let filter = EntityFilter {
                entity_types: Some(MANUAL_TYPES.to_vec()),
                ..Default::default()
            };
            let present = store.scroll(&filter, 100_000).await.unwrap_or_default();
            let present_ids: std::collections::HashSet<String> =
                present.into_iter().map(|e| e.id).collect();
            let mirror = self.mirror.lock().await;
            mirror.missing_from(&present_ids)
        };

        if missing.is_empty() {
            return Ok(());
        }
        tracing::info!("reconciling {} manual entit(ies) from mirror", missing.len());

        let mut entities = missing;
        self.embed_entities(&mut entities).await?;
        {
            let mut store = self.store.lock().await;
            store.upsert(&entities).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            for entity in &entities {
                bm25.add_document(&entity.id, &entity.content);
            }
            bm25.publish();
        }
        Ok(())
    }

    /// Embed entities in place, via the per-collection embedding cache.
    pub async fn embed_entities(&self, entities: &mut [Entity]) -> Result<()> {
        let dimension = self.embedder.dimension();
        let mut slots = Vec::new();
        let mut keys = Vec::new();
        for (i, entity) in entities.iter_mut().enumerate() {
            if entity.entity_type == EntityType::Relation {
                entity.vector = Some(vec![0.0; dimension]);
                continue;
            }
            let hash = blake3::hash(entity.content.as_bytes()).to_hex().to_string();
            keys.push(self.embedder.cache_key(&hash));
            slots.push(i);
        }

        let cached = self.state.cached_embeddings(&keys).await.unwrap_or_default();
        let mut to_embed = Vec::new();
        for (j, key) in keys.iter().enumerate() {
            if let Some(vector) = cached.get(key) {
                entities[slots[j]].vector = Some(vector.clone());
            } else {
                to_embed.push(j);
            }
        }

        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed
                .iter()
                .map(|&j| entities[slots[j]].content.clone())
                .collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            let mut cache_entries = Vec::new();
            for (k, &j) in to_embed.iter().enumerate() {
                let entity = &mut entities[slots[j]];
                entity.vector = Some(embedded[k].vector.clone());
                if embedded[k].zero_vector {
                    entity.observations.push("zero_vector".to_string());
                } else {
                    cache_entries.push((keys[j].clone(), embedded[k].vector.clone()));
                }
            }
            if let Err(e) = self.state.store_embeddings(&cache_entries).await {
                tracing::warn!("embedding cache store failed (non-fatal): {}", e);
            }
        }
        Ok(())
    }

    async fn save_bm25(&self) {
        let bm25 = self.bm25.lock().await;
        if let Err(e) = bm25.save(&self.paths.bm25_snapshot()) {
            tracing::warn!("bm25 snapshot save failed (non-fatal): {}", e);
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Write-tool entry: store hand-authored entities, mirroring manual
    /// types so they survive recreation.
    pub async fn create_manual_entities(&self, mut entities: Vec<Entity>) -> Result<Vec<String>> {
        for entity in &mut entities {
            entity
                .metadata
                .insert("manual".into(), serde_json::Value::Bool(true));
        }
        self.embed_entities(&mut entities).await?;
        {
            let mut store = self.store.lock().await;
            store.upsert(&entities).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            for entity in &entities {
                if entity.entity_type != EntityType::Relation {
                    bm25.add_document(&entity.id, &entity.content);
                }
            }
            bm25.publish();
        }
        {
            let mut mirror = self.mirror.lock().await;
            for entity in &entities {
                if entity.entity_type.is_manual() {
                    mirror.upsert(entity)?;
                }
            }
        }
        self.save_bm25().await;
        Ok(entities.into_iter().map(|e| e.id).collect())
    }

    /// Write-tool entry: store relations as payload rows.
    pub async fn create_relations(&self, relations: Vec<Relation>) -> Result<Vec<String>> {
        let entities: Vec<Entity> = relations
            .iter()
            .map(|r| r.to_entity(&self.collection))
            .collect();
        let mut entities = entities;
        self.embed_entities(&mut entities).await?;
        {
            let mut store = self.store.lock().await;
            store.upsert(&entities).await?;
        }
        Ok(entities.into_iter().map(|e| e.id).collect())
    }

    /// Write-tool entry: delete entities by id (and mirror entries).
    pub async fn delete_entities(&self, ids: &[String]) -> Result<()> {
        {
            let store = self.store.lock().await;
            store.delete(ids).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            for id in ids {
                bm25.remove_document(id);
            }
            bm25.publish();
        }
        {
            let mut mirror = self.mirror.lock().await;
            for id in ids {
                let _ = mirror.remove(id)?;
            }
        }
        self.save_bm25().await;
        Ok(())
    }

    /// Write-tool entry: append observations to an entity. Each
    /// observation lands on its own content line so a later removal can
    /// find it again.
    pub async fn add_observations(&self, id: &str, observations: Vec<String>) -> Result<bool> {
        let existing = {
            let store = self.store.lock().await;
            store.get(id).await?
        };
        let Some(mut entity) = existing else {
            return Ok(false);
        };
        entity.observations.extend(observations.iter().cloned());
        entity.content = format!("{}\n{}", entity.content, observations.join("\n"));
        self.persist_entity_update(entity).await?;
        Ok(true)
    }

    /// Write-tool entry: drop observations from an entity — the inverse of
    /// [`Self::add_observations`]. Content lines matching a removed
    /// observation go away with it, and the mirror copy is refreshed so a
    /// later recreate does not resurrect the deleted text. Returns the
    /// number removed, `None` when the entity does not exist.
    pub async fn remove_observations(
        &self,
        id: &str,
        observations: Vec<String>,
    ) -> Result<Option<usize>> {
        let existing = {
            let store = self.store.lock().await;
            store.get(id).await?
        };
        let Some(mut entity) = existing else {
            return Ok(None);
        };

        let before = entity.observations.len();
        entity.observations.retain(|o| !observations.contains(o));
        let removed = before - entity.observations.len();
        if removed == 0 {
            return Ok(Some(0));
        }

        entity.content = entity
            .content
            .lines()
            .filter(|line| !observations.iter().any(|o| o == line))
            .collect::<Vec<_>>()
            .join("\n");
        self.persist_entity_update(entity).await?;
        Ok(Some(removed))
    }

    /// Shared tail of an in-place entity mutation: re-embed, upsert,
    /// refresh the BM25 document, and keep the manual mirror in sync.
    async fn persist_entity_update(&self, entity: Entity) -> Result<()> {
        let mut batch = vec![entity];
        self.embed_entities(&mut batch).await?;
        {
            let mut store = self.store.lock().await;
            store.upsert(&batch).await?;
        }
        {
            let mut bm25 = self.bm25.lock().await;
            bm25.add_document(&batch[0].id, &batch[0].content);
            bm25.publish();
        }
        {
            let mut mirror = self.mirror.lock().await;
            if batch[0].entity_type.is_manual() {
                mirror.upsert(&batch[0])?;
            }
        }
        self.save_bm25().await;
        Ok(())
    }

    /// Entities pass through the metadata/implementation invariant: an
    /// implementation chunk without its metadata sibling is rejected.
    pub fn validate_chunk_pairing(entities: &[Entity]) -> std::result::Result<(), String> {
        let metadata: std::collections::HashSet<(&str, &str)> = entities
            .iter()
            .filter(|e| e.chunk_kind == ChunkKind::Metadata)
            .map(|e| (e.source_path.as_str(), e.qualified_name.as_str()))
            .collect();
        for entity in entities {
            if entity.chunk_kind == ChunkKind::Implementation
                && !metadata.contains(&(entity.source_path.as_str(), entity.qualified_name.as_str()))
            {
                return Err(format!(
                    "implementation chunk '{}' has no metadata sibling",
                    entity.qualified_name
                ));
            }
        }
        Ok(())
    }
}
