//! `search_docs` / `get_doc` — retrieval restricted to documentation-family
//! entities.

use anyhow::Result;
use serde_json::Value;

use super::common::{arg_str, arg_usize, require_str, result_row, ToolContext};
use super::search::tool_search_similar;
use crate::error::MnemoError;
use crate::models::{ChunkKind, Entity, EntityType};
use crate::server::budget::ResponseBuilder;

const DOC_TYPES: &[EntityType] = &[
    EntityType::Documentation,
    EntityType::Requirement,
    EntityType::Spec,
    EntityType::Prd,
    EntityType::Tdd,
    EntityType::Adr,
];

pub async fn tool_search_docs(args: Value, ctx: &ToolContext) -> Result<Value> {
    let query = require_str(&args, "query")?;
    let limit = arg_usize(&args, "limit", 10);

    // Narrow the requested types to the documentation family.
    let requested: Vec<&str> = args
        .get("doc_types")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let types: Vec<&'static str> = if requested.is_empty() {
        DOC_TYPES.iter().map(|t| t.as_str()).collect()
    } else {
        let mut narrowed = Vec::new();
        for name in requested {
            let parsed = EntityType::parse(name)
                .filter(|t| t.is_documentation())
                .ok_or_else(|| {
                    MnemoError::InvalidParams(format!("'{}' is not a documentation type", name))
                })?;
            narrowed.push(parsed.as_str());
        }
        narrowed
    };

    let forwarded = serde_json::json!({
        "query": query,
        "limit": limit,
        "mode": args.get("mode").cloned().unwrap_or_else(|| "hybrid".into()),
        "entity_types": types,
        "max_tokens": args.get("max_tokens").cloned().unwrap_or(Value::Null),
    });
    tool_search_similar(forwarded, ctx).await
}

pub async fn tool_get_doc(args: Value, ctx: &ToolContext) -> Result<Value> {
    let doc_id = require_str(&args, "doc_id")?;
    let section = arg_str(&args, "section");
    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));

    let store = ctx.service.store();
    let store = store.lock().await;
    let Some(metadata) = store.get(doc_id).await? else {
        builder.warn(format!("no document with id '{}'", doc_id));
        return Ok(builder.into_envelope());
    };
    if !metadata.entity_type.is_documentation() {
        return Err(MnemoError::InvalidParams(format!(
            "'{}' is not a documentation entity",
            doc_id
        ))
        .into());
    }

    // The full body lives in the implementation sibling; fall back to the
    // metadata chunk for requirement entities.
    let body_id = Entity::derive_id(
        store.collection(),
        &metadata.source_path,
        &metadata.qualified_name,
        metadata.entity_type,
        ChunkKind::Implementation,
    );
    let body = store.get(&body_id).await?.unwrap_or_else(|| metadata.clone());

    match section {
        None => {
            builder.push(result_row(&body, 1.0));
        }
        Some(section) => match extract_section(&body.content, section) {
            Some(snippet) => {
                let mut row = result_row(&body, 1.0);
                row["content"] = Value::String(snippet);
                row["section"] = Value::String(section.to_string());
                builder.push(row);
            }
            None => {
                builder.warn(format!("section '{}' not found in '{}'", section, doc_id));
                builder.push(result_row(&metadata, 1.0));
            }
        },
    }
    Ok(builder.into_envelope())
}

/// Slice a markdown body from the named heading to the next heading of the
/// same or shallower level.
fn extract_section(content: &str, section: &str) -> Option<String> {
    let wanted = section.trim().to_ascii_lowercase();
    let mut lines = Vec::new();
    let mut capture_level = None::<usize>;

    for line in content.lines() {
        let hashes = line.chars().take_while(|&c| c == '#').count();
        let is_heading = hashes > 0 && line.chars().nth(hashes) == Some(' ');
        if let Some(level) = capture_level {
            if is_heading && hashes <= level {
                break;
            }
            lines.push(line);
        } else if is_heading {
            let title = line[hashes..].trim().to_ascii_lowercase();
            if title == wanted {
                capture_level = Some(hashes);
                lines.push(line);
            }
        }
    }

    capture_level.map(|_| lines.join("\n"))
}
