//! `get_implementation` — the explicit expansion path from metadata to
//! implementation chunks, in three scopes.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::Value;

use super::common::{arg_str, require_str, result_row, ToolContext};
use super::graph::find_by_name;
use crate::error::MnemoError;
use crate::models::{ChunkKind, Entity, EntityType, Relation, RelationKind};
use crate::server::budget::ResponseBuilder;
use crate::storage::EntityFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Just the named entity's implementation chunk(s).
    Minimal,
    /// Plus directly-called helpers in the same file.
    Logical,
    /// Plus one hop through import edges.
    Dependencies,
}

impl Scope {
    fn parse(raw: Option<&str>) -> Result<Self, MnemoError> {
        match raw {
            None | Some("minimal") => Ok(Self::Minimal),
            Some("logical") => Ok(Self::Logical),
            Some("dependencies") => Ok(Self::Dependencies),
            Some(other) => Err(MnemoError::InvalidParams(format!(
                "unknown scope '{}'",
                other
            ))),
        }
    }
}

pub async fn tool_get_implementation(args: Value, ctx: &ToolContext) -> Result<Value> {
    let name = require_str(&args, "name")?;
    let scope = Scope::parse(arg_str(&args, "scope"))?;
    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));

    let store = ctx.service.store();
    let store = store.lock().await;

    let named: Vec<Entity> = find_by_name(&store, name, None)
        .await?
        .into_iter()
        .filter(|e| e.entity_type != EntityType::Relation)
        .collect();
    if named.is_empty() {
        builder.warn(format!("no entity named '{}'", name));
        return Ok(builder.into_envelope());
    }

    let implementations: Vec<&Entity> = named
        .iter()
        .filter(|e| e.chunk_kind == ChunkKind::Implementation)
        .collect();

    let mut emitted: HashSet<String> = HashSet::new();
    for implementation in &implementations {
        if emitted.insert(implementation.id.clone()) {
            if !builder.push(result_row(implementation, 1.0)) {
                return Ok(builder.into_envelope());
            }
        }
    }
    if implementations.is_empty() {
        // Documentary entities have no implementation chunk; serve the
        // metadata chunk instead of an empty answer.
        for metadata in named.iter().filter(|e| e.chunk_kind == ChunkKind::Metadata) {
            if emitted.insert(metadata.id.clone()) {
                builder.warn(format!("'{}' has no implementation chunk", name));
                if !builder.push(result_row(metadata, 1.0)) {
                    return Ok(builder.into_envelope());
                }
            }
        }
    }

    if scope == Scope::Minimal {
        return Ok(builder.into_envelope());
    }

    // Relations once, for both wider scopes.
    let relation_rows = store
        .scroll(
            &EntityFilter {
                entity_types: Some(vec![EntityType::Relation]),
                ..Default::default()
            },
            5000,
        )
        .await?;
    let relations: Vec<Relation> = relation_rows
        .iter()
        .filter_map(Relation::from_entity)
        .collect();

    let named_meta_ids: HashSet<&str> = named
        .iter()
        .filter(|e| e.chunk_kind == ChunkKind::Metadata)
        .map(|e| e.id.as_str())
        .collect();
    let home_paths: HashSet<&str> = named.iter().map(|e| e.source_path.as_str()).collect();

    // Logical: same-file helpers reached by call edges from the named
    // entity's metadata chunk.
    let mut helper_meta_ids: Vec<String> = relations
        .iter()
        .filter(|r| r.kind == RelationKind::Calls && named_meta_ids.contains(r.from_id.as_str()))
        .map(|r| r.to_id.clone())
        .collect();
    helper_meta_ids.sort();
    helper_meta_ids.dedup();

    for helper_id in &helper_meta_ids {
        let Some(helper_meta) = store.get(helper_id).await? else {
            continue;
        };
        if !home_paths.contains(helper_meta.source_path.as_str()) {
            continue;
        }
        if let Some(imp) = implementation_sibling(&store, &helper_meta).await? {
            if emitted.insert(imp.id.clone()) && !builder.push(result_row(&imp, 0.8)) {
                return Ok(builder.into_envelope());
            }
        }
    }

    if scope == Scope::Logical {
        return Ok(builder.into_envelope());
    }

    // Dependencies: follow the home files' import edges one hop and pull
    // implementation chunks referenced from those files.
    let home_file_ids: HashSet<String> = home_paths
        .iter()
        .map(|path| {
            Entity::derive_id(
                ctx.service.collection(),
                path,
                path,
                EntityType::File,
                ChunkKind::Metadata,
            )
        })
        .collect();
    let imported_file_ids: Vec<&Relation> = relations
        .iter()
        .filter(|r| r.kind == RelationKind::Imports && home_file_ids.contains(&r.from_id))
        .collect();

    for import in imported_file_ids {
        let Some(target_file) = store.get(&import.to_id).await? else {
            continue;
        };
        let imported = store
            .scroll(
                &EntityFilter {
                    chunk_kind: Some(ChunkKind::Implementation),
                    source_path_prefix: Some(target_file.source_path.clone()),
                    ..Default::default()
                },
                50,
            )
            .await?;
        for entity in imported {
            if emitted.insert(entity.id.clone()) && !builder.push(result_row(&entity, 0.6)) {
                return Ok(builder.into_envelope());
            }
        }
    }

    Ok(builder.into_envelope())
}

async fn implementation_sibling(
    store: &crate::storage::VectorStore,
    metadata: &Entity,
) -> Result<Option<Entity>> {
    let id = Entity::derive_id(
        store.collection(),
        &metadata.source_path,
        &metadata.qualified_name,
        metadata.entity_type,
        ChunkKind::Implementation,
    );
    Ok(store.get(&id).await?)
}
