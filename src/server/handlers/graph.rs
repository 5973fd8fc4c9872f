//! `read_graph` — bounded traversal of the relation graph, a summarised
//! overview, or raw entity listing.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use serde_json::{json, Value};

use super::common::{arg_str, arg_usize, entity_types_arg, result_row, ToolContext};
use crate::error::MnemoError;
use crate::models::{ChunkKind, Entity, EntityType, Relation};
use crate::server::budget::ResponseBuilder;
use crate::storage::EntityFilter;

/// Cycles exist (mutually recursive functions); traversal carries a
/// visited set, a depth bound and a hard node cap.
const TRAVERSAL_DEPTH: usize = 2;
const TRAVERSAL_NODE_CAP: usize = 100;
const RELATION_SCAN_CAP: usize = 5000;

pub async fn tool_read_graph(args: Value, ctx: &ToolContext) -> Result<Value> {
    let mode = arg_str(&args, "mode").unwrap_or("smart");
    let limit = arg_usize(&args, "limit", 30).clamp(1, 500);
    let entity_types = entity_types_arg(&args)?;
    let start = arg_str(&args, "entity");
    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));

    match mode {
        "relationships" => relationships(ctx, limit, &mut builder).await?,
        "entities" => entities_listing(ctx, limit, &entity_types, false, &mut builder).await?,
        "raw" => entities_listing(ctx, limit, &entity_types, true, &mut builder).await?,
        "smart" => match start {
            Some(name) => traverse(ctx, name, limit, &mut builder).await?,
            None => return overview(ctx).await,
        },
        other => {
            return Err(
                MnemoError::InvalidParams(format!("unknown graph mode '{}'", other)).into(),
            )
        }
    }

    Ok(builder.into_envelope())
}

async fn relationships(ctx: &ToolContext, limit: usize, builder: &mut ResponseBuilder) -> Result<Value> {
    let store = ctx.service.store();
    let store = store.lock().await;
    let filter = EntityFilter {
        entity_types: Some(vec![EntityType::Relation]),
        ..Default::default()
    };
    let rows = store.scroll(&filter, limit).await?;
    for row in rows {
        if let Some(relation) = Relation::from_entity(&row) {
            let value = json!({
                "from_id": relation.from_id,
                "to_id": relation.to_id,
                "kind": relation.kind.as_str(),
                "weight": relation.weight,
            });
            if !builder.push(value) {
                break;
            }
        }
    }
    Ok(Value::Null)
}

/// `entities` mode serves metadata chunks; `raw` also admits
/// implementation chunks — the only search-shaped path that may, and still
/// only within the token budget.
async fn entities_listing(
    ctx: &ToolContext,
    limit: usize,
    entity_types: &Option<Vec<EntityType>>,
    raw: bool,
    builder: &mut ResponseBuilder,
) -> Result<Value> {
    let store = ctx.service.store();
    let store = store.lock().await;
    let filter = EntityFilter {
        entity_types: entity_types.clone(),
        chunk_kind: if raw { None } else { Some(ChunkKind::Metadata) },
        source_path_prefix: None,
    };
    let rows = store.scroll(&filter, limit).await?;
    for entity in rows {
        if entity.entity_type == EntityType::Relation {
            continue;
        }
        if !builder.push(result_row(&entity, 0.0)) {
            break;
        }
    }
    Ok(Value::Null)
}

/// Breadth-first traversal from a named entity across stored relations.
async fn traverse(
    ctx: &ToolContext,
    start: &str,
    limit: usize,
    builder: &mut ResponseBuilder,
) -> Result<Value> {
    let store = ctx.service.store();
    let store = store.lock().await;

    // Resolve the start entity: exact id, then qualified name, then name.
    let start_entity = match store.get(start).await? {
        Some(entity) => Some(entity),
        None => {
            let all = store
                .scroll(
                    &EntityFilter {
                        chunk_kind: Some(ChunkKind::Metadata),
                        ..Default::default()
                    },
                    RELATION_SCAN_CAP,
                )
                .await?;
            all.into_iter()
                .find(|e| e.qualified_name == start || e.name == start)
        }
    };
    let Some(start_entity) = start_entity else {
        builder.warn(format!("entity '{}' not found", start));
        return Ok(Value::Null);
    };

    // Load the relation edges once and build adjacency both ways.
    let relation_rows = store
        .scroll(
            &EntityFilter {
                entity_types: Some(vec![EntityType::Relation]),
                ..Default::default()
            },
            RELATION_SCAN_CAP,
        )
        .await?;
    let mut adjacency: HashMap<String, Vec<(String, &'static str, String)>> = HashMap::new();
    for row in &relation_rows {
        if let Some(relation) = Relation::from_entity(row) {
            adjacency
                .entry(relation.from_id.clone())
                .or_default()
                .push((relation.to_id.clone(), "out", relation.kind.as_str().to_string()));
            adjacency
                .entry(relation.to_id.clone())
                .or_default()
                .push((relation.from_id.clone(), "in", relation.kind.as_str().to_string()));
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    visited.insert(start_entity.id.clone());
    queue.push_back((start_entity.id.clone(), 0));
    builder.push(result_row(&start_entity, 1.0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= TRAVERSAL_DEPTH || visited.len() >= TRAVERSAL_NODE_CAP {
            continue;
        }
        let Some(neighbours) = adjacency.get(&current) else {
            continue;
        };
        for (neighbour_id, direction, kind) in neighbours {
            if visited.contains(neighbour_id) {
                continue;
            }
            visited.insert(neighbour_id.clone());
            let Some(entity) = store.get(neighbour_id).await? else {
                continue;
            };
            let mut row = result_row(&entity, 1.0 / (depth as f64 + 2.0));
            row["relation"] = json!({ "kind": kind, "direction": direction, "via": current.clone() });
            if !builder.push(row) {
                return Ok(Value::Null);
            }
            if builder.len() >= limit {
                return Ok(Value::Null);
            }
            queue.push_back((neighbour_id.clone(), depth + 1));
        }
    }
    Ok(Value::Null)
}

/// No start entity: a summarised overview of the collection.
async fn overview(ctx: &ToolContext) -> Result<Value> {
    let store = ctx.service.store();
    let store = store.lock().await;
    let all = store.scroll(&EntityFilter::default(), RELATION_SCAN_CAP).await?;

    let mut by_type: HashMap<&'static str, usize> = HashMap::new();
    let mut files: HashMap<String, usize> = HashMap::new();
    let mut relations = 0usize;
    for entity in &all {
        if entity.entity_type == EntityType::Relation {
            relations += 1;
            continue;
        }
        if entity.chunk_kind != ChunkKind::Metadata {
            continue;
        }
        *by_type.entry(entity.entity_type.as_str()).or_insert(0) += 1;
        if !entity.source_path.is_empty() {
            *files.entry(entity.source_path.clone()).or_insert(0) += 1;
        }
    }

    let mut top_files: Vec<(String, usize)> = files.into_iter().collect();
    top_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_files.truncate(10);

    Ok(json!({
        "results": [{
            "entity_counts": by_type,
            "relation_count": relations,
            "top_files": top_files.into_iter()
                .map(|(path, count)| json!({"path": path, "entities": count}))
                .collect::<Vec<_>>(),
        }],
        "truncated": false,
        "warnings": [],
    }))
}

/// Resolve entities by exact name for other handlers.
pub async fn find_by_name(
    store: &crate::storage::VectorStore,
    name: &str,
    chunk_kind: Option<ChunkKind>,
) -> Result<Vec<Entity>> {
    let rows = store
        .scroll(
            &EntityFilter {
                chunk_kind,
                ..Default::default()
            },
            RELATION_SCAN_CAP,
        )
        .await?;
    Ok(rows
        .into_iter()
        .filter(|e| e.qualified_name == name || e.name == name)
        .collect())
}
