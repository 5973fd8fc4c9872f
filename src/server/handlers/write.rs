//! Write tools — mutate the store. Every tool here is blocked while plan
//! mode is active (gated in the dispatcher) and invalidates the response
//! cache for the collection.

use anyhow::Result;
use serde_json::{json, Value};

use super::common::{require_str, ToolContext};
use crate::error::MnemoError;
use crate::models::{ChunkKind, Entity, EntityType, Relation, RelationKind};

fn parse_entity_spec(ctx: &ToolContext, spec: &Value) -> Result<Entity, MnemoError> {
    let name = spec
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MnemoError::InvalidParams("entity 'name' is required".into()))?;
    let type_name = spec
        .get("entity_type")
        .and_then(|v| v.as_str())
        .unwrap_or("knowledge_insight");
    let entity_type = EntityType::parse(type_name)
        .ok_or_else(|| MnemoError::InvalidParams(format!("unknown entity type '{}'", type_name)))?;
    if entity_type == EntityType::Relation {
        return Err(MnemoError::InvalidParams(
            "relations are created via create_relations".into(),
        ));
    }
    let content = spec
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or(name)
        .to_string();
    let observations: Vec<String> = spec
        .get("observations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let source_path = spec
        .get("source_path")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let qualified_name = spec
        .get("qualified_name")
        .and_then(|v| v.as_str())
        .unwrap_or(name)
        .to_string();

    let id = Entity::derive_id(
        ctx.service.collection(),
        &source_path,
        &qualified_name,
        entity_type,
        ChunkKind::Metadata,
    );
    Ok(Entity {
        id,
        entity_type,
        chunk_kind: ChunkKind::Metadata,
        name: name.to_string(),
        qualified_name,
        source_path,
        line_start: 0,
        line_end: 0,
        observations,
        content,
        vector: None,
        metadata: serde_json::Map::new(),
    })
}

pub async fn tool_create_entities(args: Value, ctx: &ToolContext) -> Result<Value> {
    let specs = args
        .get("entities")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MnemoError::InvalidParams("'entities' array is required".into()))?;
    if specs.is_empty() {
        return Err(MnemoError::InvalidParams("'entities' must be non-empty".into()).into());
    }

    let mut entities = Vec::with_capacity(specs.len());
    for spec in specs {
        entities.push(parse_entity_spec(ctx, spec)?);
    }

    let ids = ctx.service.create_manual_entities(entities).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    Ok(json!({
        "results": ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
        "truncated": false,
        "warnings": [],
    }))
}

pub async fn tool_add_observations(args: Value, ctx: &ToolContext) -> Result<Value> {
    let id = require_str(&args, "id")?;
    let observations: Vec<String> = args
        .get("observations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if observations.is_empty() {
        return Err(MnemoError::InvalidParams("'observations' must be non-empty".into()).into());
    }

    let updated = ctx.service.add_observations(id, observations).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    let warnings: Vec<String> = if updated {
        vec![]
    } else {
        vec![format!("entity '{}' not found", id)]
    };
    Ok(json!({
        "results": if updated { vec![json!({"id": id, "updated": true})] } else { vec![] },
        "truncated": false,
        "warnings": warnings,
    }))
}

fn parse_relation(spec: &Value) -> Result<Relation, MnemoError> {
    let from_id = spec
        .get("from_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MnemoError::InvalidParams("relation 'from_id' is required".into()))?;
    let to_id = spec
        .get("to_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MnemoError::InvalidParams("relation 'to_id' is required".into()))?;
    let kind_name = spec
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MnemoError::InvalidParams("relation 'kind' is required".into()))?;
    let kind = RelationKind::parse(kind_name)
        .ok_or_else(|| MnemoError::InvalidParams(format!("unknown relation kind '{}'", kind_name)))?;
    Ok(Relation {
        from_id: from_id.to_string(),
        to_id: to_id.to_string(),
        kind,
        weight: spec.get("weight").and_then(|v| v.as_f64()),
    })
}

pub async fn tool_create_relations(args: Value, ctx: &ToolContext) -> Result<Value> {
    let specs = args
        .get("relations")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MnemoError::InvalidParams("'relations' array is required".into()))?;
    let mut relations = Vec::with_capacity(specs.len());
    for spec in specs {
        relations.push(parse_relation(spec)?);
    }

    let ids = ctx.service.create_relations(relations).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    Ok(json!({
        "results": ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
        "truncated": false,
        "warnings": [],
    }))
}

pub async fn tool_delete_entities(args: Value, ctx: &ToolContext) -> Result<Value> {
    let ids: Vec<String> = args
        .get("ids")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(MnemoError::InvalidParams("'ids' must be non-empty".into()).into());
    }

    ctx.service.delete_entities(&ids).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    Ok(json!({
        "results": [{"deleted": ids.len()}],
        "truncated": false,
        "warnings": [],
    }))
}

pub async fn tool_delete_observations(args: Value, ctx: &ToolContext) -> Result<Value> {
    let id = require_str(&args, "id")?;
    let to_remove: Vec<String> = args
        .get("observations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if to_remove.is_empty() {
        return Err(MnemoError::InvalidParams("'observations' must be non-empty".into()).into());
    }

    let removed = ctx.service.remove_observations(id, to_remove).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    match removed {
        Some(removed) => Ok(json!({
            "results": [{"id": id, "removed": removed}],
            "truncated": false,
            "warnings": [],
        })),
        None => Ok(json!({
            "results": [],
            "truncated": false,
            "warnings": [format!("entity '{}' not found", id)],
        })),
    }
}

pub async fn tool_delete_relations(args: Value, ctx: &ToolContext) -> Result<Value> {
    let specs = args
        .get("relations")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MnemoError::InvalidParams("'relations' array is required".into()))?;
    let mut ids = Vec::with_capacity(specs.len());
    for spec in specs {
        let relation = parse_relation(spec)?;
        // Relation rows have deterministic ids, so the triple is enough.
        ids.push(relation.to_entity(ctx.service.collection()).id);
    }

    ctx.service.delete_entities(&ids).await?;
    ctx.state
        .response_cache
        .invalidate_collection(ctx.service.collection())
        .await;
    Ok(json!({
        "results": [{"deleted": ids.len()}],
        "truncated": false,
        "warnings": [],
    }))
}
