//! JSON mirror for manual entities — patterns, insights, issues, ideas
//! survive collection recreations and store outages here. The on-disk format
//! is forward-compatible: unknown fields are preserved verbatim.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::Entity;

use super::state::{Result, StateError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MirrorDoc {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
    /// Unknown top-level fields ride along untouched.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

pub struct ManualMirror {
    path: PathBuf,
    doc: MirrorDoc,
}

impl ManualMirror {
    /// Load the mirror file, tolerating a missing one.
    pub fn load(path: &Path) -> Result<Self> {
        let doc = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(StateError::Serde)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MirrorDoc::default(),
            Err(e) => return Err(StateError::Io(e)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    fn entry_id(value: &serde_json::Value) -> Option<&str> {
        value.get("id").and_then(|v| v.as_str())
    }

    /// Record (or replace) an entity. The stored value is the serialised
    /// entity; previously stored unknown fields of a replaced entry are
    /// dropped with it, everything else is preserved.
    pub fn upsert(&mut self, entity: &Entity) -> Result<()> {
        let mut stored = entity.clone();
        stored.vector = None; // vectors are rebuilt on reconcile
        let value = serde_json::to_value(&stored)?;
        if let Some(existing) = self
            .doc
            .entries
            .iter_mut()
            .find(|e| Self::entry_id(e) == Some(entity.id.as_str()))
        {
            *existing = value;
        } else {
            self.doc.entries.push(value);
        }
        self.persist()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.doc.entries.len();
        self.doc.entries.retain(|e| Self::entry_id(e) != Some(id));
        let removed = self.doc.entries.len() != before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Parse all entries into entities. Entries that no longer parse are
    /// skipped with a warning, never dropped from disk.
    pub fn entities(&self) -> Vec<Entity> {
        self.doc
            .entries
            .iter()
            .filter_map(|value| match serde_json::from_value(value.clone()) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    tracing::warn!("manual mirror entry unparseable, skipped: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Ids present in the mirror but absent from `store_ids` — these need
    /// to be reconciled back into the vector store on startup.
    pub fn missing_from<'a>(
        &'a self,
        store_ids: &'a std::collections::HashSet<String>,
    ) -> Vec<Entity> {
        self.entities()
            .into_iter()
            .filter(|e| !store_ids.contains(&e.id))
            .collect()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.doc)?;
        // Write-then-rename keeps the mirror readable across a crash.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, EntityType};
    use tempfile::TempDir;

    fn manual_entity(id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            entity_type: EntityType::KnowledgeInsight,
            chunk_kind: ChunkKind::Metadata,
            name: format!("insight {}", id),
            qualified_name: format!("manual/{}", id),
            source_path: String::new(),
            line_start: 0,
            line_end: 0,
            observations: vec!["manually added".into()],
            content: "always batch writes".into(),
            vector: Some(vec![0.1, 0.2]),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_upsert_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manual_mirror.json");

        let mut mirror = ManualMirror::load(&path).unwrap();
        assert!(mirror.is_empty());
        mirror.upsert(&manual_entity("m1")).unwrap();
        mirror.upsert(&manual_entity("m2")).unwrap();

        let reloaded = ManualMirror::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let entities = reloaded.entities();
        // vectors are not persisted
        assert!(entities.iter().all(|e| e.vector.is_none()));
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manual_mirror.json");
        let mut mirror = ManualMirror::load(&path).unwrap();

        mirror.upsert(&manual_entity("m1")).unwrap();
        let mut updated = manual_entity("m1");
        updated.content = "changed".into();
        mirror.upsert(&updated).unwrap();

        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.entities()[0].content, "changed");
    }

    #[test]
    fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manual_mirror.json");
        let mut mirror = ManualMirror::load(&path).unwrap();
        mirror.upsert(&manual_entity("m1")).unwrap();
        assert!(mirror.remove("m1").unwrap());
        assert!(!mirror.remove("m1").unwrap());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manual_mirror.json");
        std::fs::write(
            &path,
            r#"{"entries": [], "mirror_version": 7, "written_by": "future-mnemo"}"#,
        )
        .unwrap();

        let mut mirror = ManualMirror::load(&path).unwrap();
        mirror.upsert(&manual_entity("m1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mirror_version"], 7);
        assert_eq!(raw["written_by"], "future-mnemo");
        assert_eq!(raw["entries"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_from() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manual_mirror.json");
        let mut mirror = ManualMirror::load(&path).unwrap();
        mirror.upsert(&manual_entity("m1")).unwrap();
        mirror.upsert(&manual_entity("m2")).unwrap();

        let mut store_ids = std::collections::HashSet::new();
        store_ids.insert("m1".to_string());
        let missing = mirror.missing_from(&store_ids);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "m2");
    }
}
