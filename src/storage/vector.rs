//! Vector store adapter — one LanceDB table per collection with
//! upsert/delete/search/scroll/health/recreate, a sticky corruption flag and
//! a deliberately small indexing threshold so queries see writes quickly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::{
    connect,
    index::Index,
    query::{ExecutableQuery, QueryBase},
    Connection, DistanceType, Table,
};
use thiserror::Error;

use crate::models::{ChunkKind, Entity, EntityType};

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("LanceDB error: {0}")]
    Lance(#[from] lancedb::Error),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("collection '{0}' is corrupt; writes are refused until recreate")]
    Corrupt(String),
}

impl VectorStoreError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Default row count before an ANN index is built. Kept small so queries
/// are available soon after writes — a latency-vs-throughput trade.
const INDEX_THRESHOLD: usize = 256;
/// Threshold after `recreate`, reduced for robustness on rebuilt
/// collections.
const INDEX_THRESHOLD_RECREATED: usize = 64;

/// Escape a string value for a DataFusion SQL filter expression.
/// Doubles single quotes and strips null bytes to prevent injection.
fn escape_filter_string(s: &str) -> String {
    s.replace('\0', "").replace('\'', "''")
}

/// Post-search filter applied to candidates.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_types: Option<Vec<EntityType>>,
    pub chunk_kind: Option<ChunkKind>,
    pub source_path_prefix: Option<String>,
}

impl EntityFilter {
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(types) = &self.entity_types {
            if !types.contains(&entity.entity_type) {
                return false;
            }
        }
        if let Some(kind) = self.chunk_kind {
            if entity.chunk_kind != kind {
                return false;
            }
        }
        if let Some(prefix) = &self.source_path_prefix {
            if !entity.source_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A stored entity with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    pub entity: Entity,
    pub score: f32,
}

pub struct VectorStore {
    db: Connection,
    table: Option<Table>,
    collection: String,
    table_name: String,
    dimension: i32,
    corrupt: AtomicBool,
    index_threshold: AtomicUsize,
    last_indexed_rows: AtomicUsize,
}

impl VectorStore {
    /// Open the per-collection dataset under `data_dir`.
    pub async fn open(data_dir: &str, collection: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = connect(data_dir).execute().await?;

        let mut store = Self {
            db,
            table: None,
            collection: collection.to_string(),
            table_name: format!("entities_{}", collection.replace('-', "_")),
            dimension: dimension as i32,
            corrupt: AtomicBool::new(false),
            index_threshold: AtomicUsize::new(INDEX_THRESHOLD),
            last_indexed_rows: AtomicUsize::new(0),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("entity_type", DataType::Utf8, false),
            Field::new("chunk_kind", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("qualified_name", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, false),
            Field::new("line_start", DataType::UInt32, false),
            Field::new("line_end", DataType::UInt32, false),
            Field::new("observations", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ]))
    }

    async fn ensure_table(&mut self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.table = Some(self.db.open_table(&self.table_name).execute().await?);
        }
        Ok(())
    }

    fn check_healthy(&self) -> Result<()> {
        if self.corrupt.load(Ordering::Acquire) {
            return Err(VectorStoreError::Corrupt(self.collection.clone()));
        }
        Ok(())
    }

    /// Insert or replace entities. Every entity must carry a vector of the
    /// collection's dimension — a mismatch is an unrecoverable invariant
    /// violation.
    pub async fn upsert(&mut self, entities: &[Entity]) -> Result<()> {
        self.check_healthy()?;
        if entities.is_empty() {
            return Ok(());
        }

        for entity in entities {
            let got = entity.vector.as_ref().map(|v| v.len()).unwrap_or(0);
            if got != self.dimension as usize {
                panic!(
                    "vector dimension mismatch in collection '{}': entity {} has {} dims, store expects {}",
                    self.collection, entity.id, got, self.dimension
                );
            }
        }

        let result = self.upsert_inner(entities).await;
        if result.is_err() {
            // A failed write leaves the write log in an unknown state —
            // refuse further writes until the operator recreates.
            self.corrupt.store(true, Ordering::Release);
            tracing::error!(
                "vector store write failed, marking collection '{}' corrupt",
                self.collection
            );
        }
        result
    }

    async fn upsert_inner(&mut self, entities: &[Entity]) -> Result<()> {
        let schema = self.schema();

        let ids: ArrayRef = Arc::new(StringArray::from(
            entities.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        ));
        let types: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| e.entity_type.as_str())
                .collect::<Vec<_>>(),
        ));
        let kinds: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| e.chunk_kind.as_str())
                .collect::<Vec<_>>(),
        ));
        let names: ArrayRef = Arc::new(StringArray::from(
            entities.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
        ));
        let qualified: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| e.qualified_name.as_str())
                .collect::<Vec<_>>(),
        ));
        let paths: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| e.source_path.as_str())
                .collect::<Vec<_>>(),
        ));
        let line_starts: ArrayRef = Arc::new(UInt32Array::from(
            entities.iter().map(|e| e.line_start).collect::<Vec<_>>(),
        ));
        let line_ends: ArrayRef = Arc::new(UInt32Array::from(
            entities.iter().map(|e| e.line_end).collect::<Vec<_>>(),
        ));
        let observations: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| serde_json::to_string(&e.observations).unwrap_or_else(|_| "[]".into()))
                .collect::<Vec<_>>(),
        ));
        let contents: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| e.content.as_str())
                .collect::<Vec<_>>(),
        ));
        let metadata: ArrayRef = Arc::new(StringArray::from(
            entities
                .iter()
                .map(|e| serde_json::to_string(&e.metadata).unwrap_or_else(|_| "{}".into()))
                .collect::<Vec<_>>(),
        ));

        let flat: Vec<f32> = entities
            .iter()
            .flat_map(|e| e.vector.clone().unwrap_or_default())
            .collect();
        let values = Float32Array::from(flat);
        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors: ArrayRef = Arc::new(FixedSizeListArray::new(
            item_field,
            self.dimension,
            Arc::new(values),
            None,
        ));

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                ids, types, kinds, names, qualified, paths, line_starts, line_ends, observations,
                contents, metadata, vectors,
            ],
        )?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema.clone());

        if let Some(table) = &mut self.table {
            // Replace-by-id: delete stale rows first.
            let conditions: Vec<String> = entities
                .iter()
                .map(|e| format!("'{}'", escape_filter_string(&e.id)))
                .collect();
            let filter = format!("id IN ({})", conditions.join(", "));
            let _ = table.delete(&filter).await;
            table.add(Box::new(batches)).execute().await?;
        } else {
            let table = self
                .db
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await?;
            self.table = Some(table);
        }

        self.maybe_create_index().await;
        Ok(())
    }

    /// Delete entities by id.
    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        self.check_healthy()?;
        let Some(table) = &self.table else {
            return Ok(());
        };
        if ids.is_empty() {
            return Ok(());
        }
        for chunk in ids.chunks(200) {
            let conditions: Vec<String> = chunk
                .iter()
                .map(|id| format!("'{}'", escape_filter_string(id)))
                .collect();
            table
                .delete(&format!("id IN ({})", conditions.join(", ")))
                .await?;
        }
        Ok(())
    }

    /// Delete all entities of a source file.
    pub async fn delete_source(&self, source_path: &str) -> Result<()> {
        self.check_healthy()?;
        if let Some(table) = &self.table {
            table
                .delete(&format!(
                    "source_path = '{}'",
                    escape_filter_string(source_path)
                ))
                .await?;
        }
        Ok(())
    }

    /// Nearest-neighbour search with an optional post-filter.
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &EntityFilter,
    ) -> Result<Vec<ScoredEntity>> {
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };

        let filtered = filter.entity_types.is_some()
            || filter.chunk_kind.is_some()
            || filter.source_path_prefix.is_some();
        let fetch_limit = if filtered { limit * 3 } else { limit };

        let results = table
            .query()
            .nearest_to(query_vector)?
            .refine_factor(5)
            .limit(fetch_limit)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let mut hits = Vec::new();
        for batch in results {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for i in 0..batch.num_rows() {
                let Some(entity) = entity_from_batch(&batch, i) else {
                    continue;
                };
                if !filter.matches(&entity) {
                    continue;
                }
                let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
                hits.push(ScoredEntity {
                    entity,
                    score: 1.0 / (1.0 + distance),
                });
                if hits.len() >= limit {
                    return Ok(hits);
                }
            }
        }
        Ok(hits)
    }

    /// Scan entities matching a filter, without vector ranking.
    pub async fn scroll(&self, filter: &EntityFilter, limit: usize) -> Result<Vec<Entity>> {
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };

        let results = table
            .query()
            .limit(limit.max(1) * 4)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let mut out = Vec::new();
        for batch in results {
            for i in 0..batch.num_rows() {
                let Some(entity) = entity_from_batch(&batch, i) else {
                    continue;
                };
                if filter.matches(&entity) {
                    out.push(entity);
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Fetch a single entity by id.
    pub async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let Some(table) = &self.table else {
            return Ok(None);
        };
        let results = table
            .query()
            .only_if(format!("id = '{}'", escape_filter_string(id)))
            .limit(1)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        for batch in results {
            if batch.num_rows() > 0 {
                return Ok(entity_from_batch(&batch, 0));
            }
        }
        Ok(None)
    }

    pub async fn count(&self) -> Result<usize> {
        match &self.table {
            Some(table) => Ok(table.count_rows(None).await?),
            None => Ok(0),
        }
    }

    /// Health check: the sticky corruption flag plus a live row count.
    pub async fn health(&self) -> Result<()> {
        self.check_healthy()?;
        let _ = self.count().await?;
        Ok(())
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt.load(Ordering::Acquire)
    }

    /// Mark the collection corrupt (used when an external failure is
    /// detected outside a write call).
    pub fn mark_corrupt(&self) {
        self.corrupt.store(true, Ordering::Release);
    }

    /// Drop and rebuild the table. Clears the corruption flag and lowers the
    /// indexing threshold so the rebuilt collection indexes sooner.
    pub async fn recreate(&mut self) -> Result<()> {
        if self.table.is_some() {
            match self.db.drop_table(&self.table_name).await {
                Ok(()) => {}
                Err(e) => tracing::warn!("drop_table during recreate: {}", e),
            }
            self.table = None;
        }
        self.corrupt.store(false, Ordering::Release);
        self.index_threshold
            .store(INDEX_THRESHOLD_RECREATED, Ordering::Release);
        self.last_indexed_rows.store(0, Ordering::Release);
        tracing::info!(
            "collection '{}' recreated (index threshold now {})",
            self.collection,
            INDEX_THRESHOLD_RECREATED
        );
        Ok(())
    }

    /// Create an IVF-PQ index once the table is big enough; rebuilds only
    /// after >= 20% growth since the last build.
    async fn maybe_create_index(&self) {
        let Some(table) = &self.table else {
            return;
        };
        let rows = match table.count_rows(None).await {
            Ok(n) => n,
            Err(_) => return,
        };
        let threshold = self.index_threshold.load(Ordering::Acquire);
        if rows < threshold {
            return;
        }
        let last = self.last_indexed_rows.load(Ordering::Acquire);
        if last > 0 {
            let growth = (rows as f64 - last as f64) / last as f64;
            if growth < 0.20 {
                return;
            }
        }

        let num_partitions = ((rows as f64).sqrt() as u32).clamp(4, 256);
        let index = lancedb::index::vector::IvfPqIndexBuilder::default()
            .distance_type(DistanceType::Cosine)
            .num_partitions(num_partitions)
            .num_sub_vectors(16);

        match table.create_index(&["vector"], Index::IvfPq(index)).execute().await {
            Ok(()) => {
                self.last_indexed_rows.store(rows, Ordering::Release);
                tracing::info!(
                    "IVF-PQ index built on {} rows ({} partitions)",
                    rows,
                    num_partitions
                );
            }
            Err(e) => tracing::warn!("vector index build failed (non-fatal): {}", e),
        }
    }
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

fn u32_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
}

fn entity_from_batch(batch: &RecordBatch, row: usize) -> Option<Entity> {
    let ids = string_col(batch, "id")?;
    let types = string_col(batch, "entity_type")?;
    let kinds = string_col(batch, "chunk_kind")?;
    let names = string_col(batch, "name")?;
    let qualified = string_col(batch, "qualified_name")?;
    let paths = string_col(batch, "source_path")?;
    let line_starts = u32_col(batch, "line_start")?;
    let line_ends = u32_col(batch, "line_end")?;
    let observations = string_col(batch, "observations")?;
    let contents = string_col(batch, "content")?;
    let metadata = string_col(batch, "metadata")?;

    let entity_type = EntityType::parse(types.value(row))?;
    let chunk_kind = match kinds.value(row) {
        "implementation" => ChunkKind::Implementation,
        _ => ChunkKind::Metadata,
    };

    Some(Entity {
        id: ids.value(row).to_string(),
        entity_type,
        chunk_kind,
        name: names.value(row).to_string(),
        qualified_name: qualified.value(row).to_string(),
        source_path: paths.value(row).to_string(),
        line_start: line_starts.value(row),
        line_end: line_ends.value(row),
        observations: serde_json::from_str(observations.value(row)).unwrap_or_default(),
        content: contents.value(row).to_string(),
        vector: None, // not materialised on read paths
        metadata: serde_json::from_str(metadata.value(row)).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    async fn open_store() -> (VectorStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::open(tmp.path().to_str().unwrap(), "demo", DIM)
            .await
            .unwrap();
        (store, tmp)
    }

    fn entity(id: &str, path: &str, content: &str, seed: f32) -> Entity {
        let mut vector = vec![0.0f32; DIM];
        vector[0] = seed;
        vector[1] = 1.0 - seed;
        Entity {
            id: id.to_string(),
            entity_type: EntityType::Function,
            chunk_kind: ChunkKind::Metadata,
            name: id.to_string(),
            qualified_name: format!("m.{}", id),
            source_path: path.to_string(),
            line_start: 1,
            line_end: 5,
            observations: vec!["obs".into()],
            content: content.to_string(),
            vector: Some(vector),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_count() {
        let (mut store, _tmp) = open_store().await;
        assert_eq!(store.count().await.unwrap(), 0);
        store
            .upsert(&[entity("e1", "a.py", "one", 0.1), entity("e2", "a.py", "two", 0.9)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let (mut store, _tmp) = open_store().await;
        store.upsert(&[entity("e1", "a.py", "old", 0.1)]).await.unwrap();
        store.upsert(&[entity("e1", "a.py", "new", 0.1)]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.get("e1").await.unwrap().unwrap();
        assert_eq!(got.content, "new");
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let (mut store, _tmp) = open_store().await;
        store
            .upsert(&[
                entity("near", "a.py", "near", 0.9),
                entity("far", "a.py", "far", 0.05),
            ])
            .await
            .unwrap();

        let mut query = vec![0.0f32; DIM];
        query[0] = 0.9;
        query[1] = 0.1;
        let hits = store.search(&query, 2, &EntityFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity.id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_with_type_filter() {
        let (mut store, _tmp) = open_store().await;
        let mut doc = entity("d1", "doc.md", "doc", 0.5);
        doc.entity_type = EntityType::Documentation;
        store
            .upsert(&[doc, entity("f1", "a.py", "func", 0.5)])
            .await
            .unwrap();

        let filter = EntityFilter {
            entity_types: Some(vec![EntityType::Documentation]),
            ..Default::default()
        };
        let query = vec![0.5f32; DIM];
        let hits = store.search(&query, 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, "d1");
    }

    #[tokio::test]
    async fn test_delete_source() {
        let (mut store, _tmp) = open_store().await;
        store
            .upsert(&[
                entity("e1", "keep.py", "x", 0.1),
                entity("e2", "drop.py", "y", 0.2),
                entity("e3", "drop.py", "z", 0.3),
            ])
            .await
            .unwrap();
        store.delete_source("drop.py").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_ids() {
        let (mut store, _tmp) = open_store().await;
        store
            .upsert(&[entity("e1", "a.py", "x", 0.1), entity("e2", "a.py", "y", 0.2)])
            .await
            .unwrap();
        store.delete(&["e1".to_string()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_flag_refuses_writes_until_recreate() {
        let (mut store, _tmp) = open_store().await;
        store.upsert(&[entity("e1", "a.py", "x", 0.1)]).await.unwrap();
        store.mark_corrupt();

        let err = store.upsert(&[entity("e2", "a.py", "y", 0.2)]).await.unwrap_err();
        assert!(err.is_corruption());
        assert!(store.health().await.is_err());

        store.recreate().await.unwrap();
        assert!(!store.is_corrupt());
        assert_eq!(store.count().await.unwrap(), 0);
        store.upsert(&[entity("e2", "a.py", "y", 0.2)]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scroll_with_filter() {
        let (mut store, _tmp) = open_store().await;
        store
            .upsert(&[
                entity("e1", "src/a.py", "x", 0.1),
                entity("e2", "lib/b.py", "y", 0.2),
            ])
            .await
            .unwrap();
        let filter = EntityFilter {
            source_path_prefix: Some("src/".into()),
            ..Default::default()
        };
        let rows = store.scroll(&filter, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "e1");
    }

    #[tokio::test]
    async fn test_observations_round_trip() {
        let (mut store, _tmp) = open_store().await;
        let mut e = entity("e1", "a.py", "x", 0.1);
        e.observations = vec!["first".into(), "second".into()];
        e.metadata.insert("language".into(), "python".into());
        store.upsert(&[e]).await.unwrap();
        let got = store.get("e1").await.unwrap().unwrap();
        assert_eq!(got.observations, vec!["first", "second"]);
        assert_eq!(got.meta_str("language"), Some("python"));
    }
}
