//! Shared handler plumbing: tool context, argument accessors and the
//! result-row shape of the tool envelope.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::MnemoError;
use crate::indexer::IndexerService;
use crate::models::{ChunkKind, Entity, EntityType};
use crate::server::state::DaemonState;

/// Everything a tool handler needs for one call.
pub struct ToolContext {
    pub state: Arc<DaemonState>,
    pub service: Arc<IndexerService>,
}

impl ToolContext {
    pub fn budget_tokens(&self, args: &Value) -> usize {
        args.get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.state.config.budget.max_response_tokens)
    }
}

pub fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, MnemoError> {
    arg_str(args, key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MnemoError::InvalidParams(format!("'{}' is required", key)))
}

pub fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Parse an optional `entity_types` array; unknown names are an error.
pub fn entity_types_arg(args: &Value) -> Result<Option<Vec<EntityType>>, MnemoError> {
    let Some(raw) = args.get("entity_types").and_then(|v| v.as_array()) else {
        return Ok(None);
    };
    let mut types = Vec::with_capacity(raw.len());
    for item in raw {
        let name = item
            .as_str()
            .ok_or_else(|| MnemoError::InvalidParams("entity_types must be strings".into()))?;
        let parsed = EntityType::parse(name)
            .ok_or_else(|| MnemoError::InvalidParams(format!("unknown entity type '{}'", name)))?;
        types.push(parsed);
    }
    Ok(Some(types))
}

/// One result row of the tool envelope. Implementation chunks additionally
/// carry `language` and `signature`.
pub fn result_row(entity: &Entity, score: f64) -> Value {
    let mut row = json!({
        "id": entity.id,
        "entity_type": entity.entity_type.as_str(),
        "name": entity.name,
        "source_path": entity.source_path,
        "line_start": entity.line_start,
        "line_end": entity.line_end,
        "score": score,
        "content": entity.content,
        "observations": entity.observations,
    });
    if entity.chunk_kind == ChunkKind::Implementation {
        row["language"] = entity
            .meta_str("language")
            .map(Value::from)
            .unwrap_or(Value::Null);
        row["signature"] = entity
            .meta_str("signature")
            .map(Value::from)
            .unwrap_or(Value::Null);
    }
    row
}

/// Stable digest of the args object, for the response cache key.
pub fn args_digest(tool: &str, args: &Value) -> String {
    let serialised = serde_json::to_string(args).unwrap_or_default();
    let hash = blake3::hash(format!("{}\0{}", tool, serialised).as_bytes());
    hash.to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str() {
        let args = json!({"query": "hello", "empty": ""});
        assert_eq!(require_str(&args, "query").unwrap(), "hello");
        assert!(require_str(&args, "empty").is_err());
        assert!(require_str(&args, "missing").is_err());
    }

    #[test]
    fn test_entity_types_arg() {
        let args = json!({"entity_types": ["function", "class"]});
        let types = entity_types_arg(&args).unwrap().unwrap();
        assert_eq!(types, vec![EntityType::Function, EntityType::Class]);

        let bad = json!({"entity_types": ["nonsense"]});
        assert!(entity_types_arg(&bad).is_err());

        assert!(entity_types_arg(&json!({})).unwrap().is_none());
    }

    #[test]
    fn test_result_row_implementation_extras() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("language".into(), "python".into());
        metadata.insert("signature".into(), "def f()".into());
        let entity = Entity {
            id: "e1".into(),
            entity_type: EntityType::Function,
            chunk_kind: ChunkKind::Implementation,
            name: "f".into(),
            qualified_name: "m.f".into(),
            source_path: "a.py".into(),
            line_start: 1,
            line_end: 3,
            observations: vec![],
            content: "def f():\n    pass".into(),
            vector: None,
            metadata,
        };
        let row = result_row(&entity, 0.5);
        assert_eq!(row["language"], "python");
        assert_eq!(row["signature"], "def f()");

        let mut meta_entity = entity.clone();
        meta_entity.chunk_kind = ChunkKind::Metadata;
        let meta_row = result_row(&meta_entity, 0.5);
        assert!(meta_row.get("language").is_none());
    }

    #[test]
    fn test_args_digest_stable() {
        let args = json!({"query": "x", "limit": 5});
        assert_eq!(args_digest("t", &args), args_digest("t", &args));
        assert_ne!(args_digest("t", &args), args_digest("other", &args));
    }
}
