//! Lexical BM25 index over the same content used for embedding.
//!
//! Single writer (the indexer), many readers: queries run against a
//! copy-on-write snapshot so long searches see a consistent view while
//! upserts continue. The snapshot also persists to disk as a
//! forward-compatible JSON envelope.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Immutable index state shared with readers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Snapshot {
    /// term → (doc id → term frequency)
    postings: HashMap<String, HashMap<String, u32>>,
    /// doc id → token count
    doc_lengths: HashMap<String, u32>,
    /// doc id → distinct terms, kept for cheap removal
    doc_terms: HashMap<String, Vec<String>>,
    total_tokens: u64,
    /// Unknown fields from newer writers survive a round trip.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Bm25Snapshot {
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_lengths.contains_key(doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.doc_lengths.keys()
    }

    fn add_document(&mut self, doc_id: &str, text: &str) {
        self.remove_document(doc_id);
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        self.doc_lengths.insert(doc_id.to_string(), tokens.len() as u32);
        self.total_tokens += tokens.len() as u64;
        let mut terms = Vec::with_capacity(counts.len());
        for (term, tf) in counts {
            terms.push(term.clone());
            self.postings
                .entry(term)
                .or_default()
                .insert(doc_id.to_string(), tf);
        }
        terms.sort();
        self.doc_terms.insert(doc_id.to_string(), terms);
    }

    fn remove_document(&mut self, doc_id: &str) {
        let Some(length) = self.doc_lengths.remove(doc_id) else {
            return;
        };
        self.total_tokens = self.total_tokens.saturating_sub(length as u64);
        if let Some(terms) = self.doc_terms.remove(doc_id) {
            for term in terms {
                if let Some(docs) = self.postings.get_mut(&term) {
                    docs.remove(doc_id);
                    if docs.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }
    }

    /// Score documents against a query; returns `(doc_id, score)` ranked
    /// descending, ties broken by doc id for determinism.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f32)> {
        let n = self.doc_lengths.len() as f32;
        if n == 0.0 {
            return Vec::new();
        }
        let avg_len = self.total_tokens as f32 / n;

        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (doc_id, &tf) in docs {
                let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
                let contribution = idf * tf * (K1 + 1.0) / denom;
                *scores.entry(doc_id.as_str()).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

/// Writer half: owns the mutable state and publishes snapshots.
pub struct Bm25Index {
    data: Bm25Snapshot,
    published: Arc<RwLock<Arc<Bm25Snapshot>>>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            data: Bm25Snapshot::default(),
            published: Arc::new(RwLock::new(Arc::new(Bm25Snapshot::default()))),
        }
    }

    pub fn add_document(&mut self, doc_id: &str, text: &str) {
        self.data.add_document(doc_id, text);
    }

    pub fn remove_document(&mut self, doc_id: &str) {
        self.data.remove_document(doc_id);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Publish the current state for readers. Called at batch boundaries,
    /// not per document — cloning the index is the COW cost.
    pub fn publish(&self) {
        let snapshot = Arc::new(self.data.clone());
        if let Ok(mut published) = self.published.write() {
            *published = snapshot;
        }
    }

    /// Cheap handle for readers; the snapshot never changes underneath a
    /// running query.
    pub fn snapshot(&self) -> Arc<Bm25Snapshot> {
        self.published
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let data: Bm25Snapshot = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Bm25Snapshot::default(),
            Err(e) => return Err(e),
        };
        let index = Self {
            published: Arc::new(RwLock::new(Arc::new(data.clone()))),
            data,
        };
        Ok(index)
    }
}

/// Language-agnostic tokeniser: lower-cased unicode word characters;
/// camelCase and snake_case tokens contribute their parts in addition to
/// the whole token.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if raw.is_empty() {
            continue;
        }
        let whole = raw.to_lowercase();
        let parts = split_identifier(raw);
        if parts.len() > 1 {
            out.extend(parts);
        }
        out.push(whole);
    }
    out
}

fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        }
        prev_lower = ch.is_lowercase() || ch.is_numeric();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_camel_and_snake() {
        let tokens = tokenize("validateToken for user_id");
        assert!(tokens.contains(&"validatetoken".to_string()));
        assert!(tokens.contains(&"validate".to_string()));
        assert!(tokens.contains(&"token".to_string()));
        assert!(tokens.contains(&"user_id".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(tokens.contains(&"id".to_string()));
        assert!(tokens.contains(&"for".to_string()));
    }

    #[test]
    fn test_tokenize_plain_word_not_duplicated() {
        let tokens = tokenize("hello");
        assert_eq!(tokens, vec!["hello".to_string()]);
    }

    #[test]
    fn test_search_ranks_matching_docs() {
        let mut index = Bm25Index::new();
        index.add_document("d1", "fn validate_token_for_user(token)");
        index.add_document("d2", "struct DatabasePool with connections");
        index.add_document("d3", "token refresh helper");
        index.publish();

        let snapshot = index.snapshot();
        let results = snapshot.search("validate user token", 10);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "d1");
    }

    #[test]
    fn test_remove_document() {
        let mut index = Bm25Index::new();
        index.add_document("d1", "alpha beta");
        index.add_document("d2", "alpha gamma");
        index.remove_document("d1");
        index.publish();

        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 1);
        let results = snapshot.search("alpha", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "d2");
        assert!(!snapshot.contains("d1"));
    }

    #[test]
    fn test_reindex_same_doc_replaces() {
        let mut index = Bm25Index::new();
        index.add_document("d1", "old words here");
        index.add_document("d1", "new content");
        index.publish();
        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.search("old", 10).is_empty());
        assert!(!snapshot.search("new", 10).is_empty());
    }

    #[test]
    fn test_snapshot_isolated_from_writer() {
        let mut index = Bm25Index::new();
        index.add_document("d1", "stable view");
        index.publish();
        let snapshot = index.snapshot();

        // Writer keeps mutating; the held snapshot must not change.
        index.add_document("d2", "new doc");
        index.remove_document("d1");
        index.publish();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("d1"));
        assert_eq!(index.snapshot().len(), 1);
        assert!(index.snapshot().contains("d2"));
    }

    #[test]
    fn test_empty_query_and_empty_index() {
        let index = Bm25Index::new();
        assert!(index.snapshot().search("anything", 5).is_empty());

        let mut index = Bm25Index::new();
        index.add_document("d1", "something");
        index.publish();
        assert!(index.snapshot().search("", 5).is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bm25_snapshot.json");

        let mut index = Bm25Index::new();
        index.add_document("d1", "persisted content");
        index.save(&path).unwrap();

        let loaded = Bm25Index::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let results = loaded.snapshot().search("persisted", 5);
        assert_eq!(results[0].0, "d1");
    }

    #[test]
    fn test_snapshot_json_preserves_unknown_fields() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bm25_snapshot.json");
        std::fs::write(
            &path,
            r#"{"postings": {}, "doc_lengths": {}, "doc_terms": {}, "total_tokens": 0, "format_rev": 9}"#,
        )
        .unwrap();

        let loaded = Bm25Index::load(&path).unwrap();
        loaded.save(&path).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["format_rev"], 9);
    }

    #[test]
    fn test_deterministic_ranking_with_ties() {
        let mut index = Bm25Index::new();
        index.add_document("b", "same words");
        index.add_document("a", "same words");
        index.publish();
        let results = index.snapshot().search("same", 10);
        assert_eq!(results[0].0, "a"); // tie broken by id
        assert_eq!(results[1].0, "b");
    }
}
