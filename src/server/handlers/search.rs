//! `search_similar` — semantic, keyword and hybrid retrieval over metadata
//! chunks, with degraded-mode fallbacks and the token budget applied per
//! candidate.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;

use super::common::{arg_str, arg_usize, args_digest, entity_types_arg, require_str, result_row, ToolContext};
use crate::error::MnemoError;
use crate::models::{ChunkKind, Entity, EntityType};
use crate::search::fuse;
use crate::server::budget::{error_envelope, ResponseBuilder};
use crate::storage::EntityFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    fn parse(raw: Option<&str>) -> Result<Self, MnemoError> {
        match raw {
            None | Some("hybrid") => Ok(Self::Hybrid),
            Some("semantic") => Ok(Self::Semantic),
            Some("keyword") => Ok(Self::Keyword),
            Some(other) => Err(MnemoError::InvalidParams(format!(
                "unknown search mode '{}'",
                other
            ))),
        }
    }
}

pub async fn tool_search_similar(args: Value, ctx: &ToolContext) -> Result<Value> {
    let started = Instant::now();
    let query = require_str(&args, "query")?;
    let limit = arg_usize(&args, "limit", 10).clamp(1, 100);
    let mode = SearchMode::parse(arg_str(&args, "mode"))?;
    let entity_types = entity_types_arg(&args)?;

    // Repeated identical queries short-circuit to the response cache.
    let digest = args_digest("search_similar", &args);
    if let Some(cached) = ctx
        .state
        .response_cache
        .get(ctx.service.collection(), "search_similar", &digest)
        .await
    {
        if let Ok(value) = serde_json::from_str::<Value>(&cached) {
            return Ok(value);
        }
    }

    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));
    let envelope = match mode {
        SearchMode::Keyword => {
            let hits = keyword_candidates(ctx, query, limit * 2, &entity_types).await;
            finish(&mut builder, hits, limit);
            builder.into_envelope()
        }
        SearchMode::Semantic => match semantic_candidates(ctx, query, limit * 2, &entity_types).await {
            Ok(hits) => {
                finish(&mut builder, hits, limit);
                builder.into_envelope()
            }
            Err(e) => error_envelope(e.tool_code(), &e.to_string(), None),
        },
        SearchMode::Hybrid => {
            hybrid_search(ctx, query, limit, &entity_types, &mut builder).await?
        }
    };

    ctx.state
        .metrics
        .record_query(started.elapsed().as_micros() as usize);
    // Failure envelopes are never cached — a store that comes back should
    // be visible immediately.
    if envelope.get("error").is_none() {
        ctx.state
            .response_cache
            .put(
                ctx.service.collection(),
                "search_similar",
                &digest,
                envelope.to_string(),
            )
            .await;
    }
    Ok(envelope)
}

/// Hybrid: dense + lexical candidate lists fused by weighted RRF. An
/// embedding failure degrades to keyword-only with a warning; a store
/// outage is a structured error.
async fn hybrid_search(
    ctx: &ToolContext,
    query: &str,
    limit: usize,
    entity_types: &Option<Vec<EntityType>>,
    builder: &mut ResponseBuilder,
) -> Result<Value> {
    let keyword = keyword_candidates(ctx, query, limit * 2, entity_types).await;

    let semantic = match semantic_candidates(ctx, query, limit * 2, entity_types).await {
        Ok(hits) => hits,
        Err(e @ MnemoError::VectorStore(_)) => {
            return Ok(error_envelope(e.tool_code(), &e.to_string(), None));
        }
        Err(e) => {
            tracing::warn!("hybrid search degraded to keyword-only: {}", e);
            builder.warn(format!("semantic search unavailable: {}", e));
            finish(builder, keyword, limit);
            let mut envelope = builder_to_envelope(builder);
            envelope["degraded"] = Value::Bool(true);
            return Ok(envelope);
        }
    };

    let semantic_ids: Vec<String> = semantic.iter().map(|(e, _)| e.id.clone()).collect();
    let keyword_ids: Vec<String> = keyword.iter().map(|(e, _)| e.id.clone()).collect();
    let fused = fuse(&semantic_ids, &keyword_ids, &ctx.state.config.fusion);

    let mut by_id: HashMap<&str, &Entity> = HashMap::new();
    for (entity, _) in semantic.iter().chain(keyword.iter()) {
        by_id.entry(entity.id.as_str()).or_insert(entity);
    }

    for candidate in fused.iter().take(limit) {
        let Some(entity) = by_id.get(candidate.id.as_str()) else {
            continue;
        };
        if !builder.push(result_row(entity, candidate.score)) {
            break;
        }
    }
    Ok(builder_to_envelope(builder))
}

/// Dense search through the circuit breakers. Results are metadata chunks
/// only — implementation bodies never leak into a search response.
async fn semantic_candidates(
    ctx: &ToolContext,
    query: &str,
    limit: usize,
    entity_types: &Option<Vec<EntityType>>,
) -> Result<Vec<(Entity, f64)>, MnemoError> {
    let embedder = ctx.service.embedder().clone();
    let query_owned = query.to_string();
    let vector: Vec<f32> = ctx
        .state
        .embedding_circuit
        .call(|| async move {
            embedder
                .embed_query(&query_owned)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        })
        .await
        .map_err(|e: anyhow::Error| {
            MnemoError::Embedder(crate::embedder::EmbedderError::Embedding(e))
        })?;

    let filter = EntityFilter {
        entity_types: entity_types.clone(),
        chunk_kind: Some(ChunkKind::Metadata),
        source_path_prefix: None,
    };

    let store = ctx.service.store();
    let hits = ctx
        .state
        .vector_circuit
        .call(|| async {
            let store = store.lock().await;
            store
                .search(&vector, limit, &filter)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        })
        .await
        .map_err(|e| {
            MnemoError::VectorStore(crate::storage::vector::VectorStoreError::Io(
                std::io::Error::other(e.to_string()),
            ))
        })?;

    Ok(hits
        .into_iter()
        .map(|h| (h.entity, h.score as f64))
        .collect())
}

/// Lexical candidates from the BM25 snapshot, resolved against the store
/// and filtered to metadata chunks.
async fn keyword_candidates(
    ctx: &ToolContext,
    query: &str,
    limit: usize,
    entity_types: &Option<Vec<EntityType>>,
) -> Vec<(Entity, f64)> {
    let snapshot = {
        let bm25 = ctx.service.bm25();
        let guard = bm25.lock().await;
        guard.snapshot()
    };

    let ranked = snapshot.search(query, limit * 2);
    let store = ctx.service.store();
    let store = store.lock().await;

    let mut out = Vec::new();
    for (doc_id, score) in ranked {
        let Ok(Some(entity)) = store.get(&doc_id).await else {
            continue;
        };
        if entity.chunk_kind != ChunkKind::Metadata {
            continue;
        }
        if let Some(types) = entity_types {
            if !types.contains(&entity.entity_type) {
                continue;
            }
        }
        out.push((entity, score as f64));
        if out.len() >= limit {
            break;
        }
    }
    out
}

fn finish(builder: &mut ResponseBuilder, hits: Vec<(Entity, f64)>, limit: usize) {
    for (entity, score) in hits.into_iter().take(limit) {
        if !builder.push(result_row(&entity, score)) {
            break;
        }
    }
}

/// ResponseBuilder consumes itself on envelope build; swap in an empty one
/// so callers holding `&mut` can finish mid-function.
fn builder_to_envelope(builder: &mut ResponseBuilder) -> Value {
    std::mem::replace(builder, ResponseBuilder::new(0)).into_envelope()
}
