//! Tool dispatch — the stateless tool surface, with the plan-mode gate in
//! front of every write tool.

use anyhow::Result;
use serde_json::{json, Value};

use super::handlers::{self, common::ToolContext};
use crate::error::MnemoError;

/// Tools refused while plan mode is active. Read tools always pass.
pub const WRITE_TOOLS: &[&str] = &[
    "create_entities",
    "add_observations",
    "create_relations",
    "delete_entities",
    "delete_observations",
    "delete_relations",
];

/// The structured plan-mode refusal: callers match on `error` and list the
/// blocked tools without string-scraping the message.
pub fn plan_mode_denied(tool: &str) -> Value {
    json!({
        "error": "PLAN_MODE_ACCESS_DENIED",
        "tool": tool,
        "planModeActive": true,
        "blockedTools": WRITE_TOOLS,
        "hint": "plan mode is read-only; disable it with set_plan_mode(false) or unset PLAN_MODE",
    })
}

/// Dispatch a tool call by name. Returns structured JSON.
pub async fn dispatch(name: &str, args: Value, ctx: &ToolContext) -> Result<Value> {
    if WRITE_TOOLS.contains(&name) && ctx.state.plan_mode.is_active() {
        tracing::info!("plan mode blocked write tool '{}'", name);
        return Ok(plan_mode_denied(name));
    }

    match name {
        "search_similar" => handlers::search::tool_search_similar(args, ctx).await,
        "read_graph" => handlers::graph::tool_read_graph(args, ctx).await,
        "get_implementation" => handlers::implementation::tool_get_implementation(args, ctx).await,
        "search_docs" => handlers::docs::tool_search_docs(args, ctx).await,
        "get_doc" => handlers::docs::tool_get_doc(args, ctx).await,
        "search_tickets" => handlers::tickets::tool_search_tickets(args, ctx).await,
        "get_ticket" => handlers::tickets::tool_get_ticket(args, ctx).await,
        "create_entities" => handlers::write::tool_create_entities(args, ctx).await,
        "add_observations" => handlers::write::tool_add_observations(args, ctx).await,
        "create_relations" => handlers::write::tool_create_relations(args, ctx).await,
        "delete_entities" => handlers::write::tool_delete_entities(args, ctx).await,
        "delete_observations" => handlers::write::tool_delete_observations(args, ctx).await,
        "delete_relations" => handlers::write::tool_delete_relations(args, ctx).await,
        "set_plan_mode" => tool_set_plan_mode(args, ctx),
        "status" => tool_status(ctx).await,
        "health" => tool_health(ctx).await,
        "progress" => Ok(json!(ctx.state.sync_progress.snapshot())),
        other => Err(MnemoError::MethodNotFound(other.to_string()).into()),
    }
}

fn tool_set_plan_mode(args: Value, ctx: &ToolContext) -> Result<Value> {
    let enabled = args
        .get("enabled")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| MnemoError::InvalidParams("'enabled' boolean is required".into()))?;
    ctx.state.plan_mode.set(enabled);
    tracing::info!("plan mode {}", if enabled { "enabled" } else { "disabled" });
    Ok(json!({
        "results": [{"plan_mode": enabled}],
        "truncated": false,
        "warnings": [],
    }))
}

async fn tool_status(ctx: &ToolContext) -> Result<Value> {
    let store = ctx.service.store();
    let entity_count = {
        let store = store.lock().await;
        store.count().await.unwrap_or(0)
    };
    let bm25_docs = {
        let bm25 = ctx.service.bm25();
        let guard = bm25.lock().await;
        guard.snapshot().len()
    };
    Ok(json!({
        "results": [{
            "collection": ctx.service.collection(),
            "entities": entity_count,
            "bm25_documents": bm25_docs,
            "plan_mode": ctx.state.plan_mode.is_active(),
            "uptime_secs": ctx.state.started_at.elapsed().as_secs(),
            "metrics": ctx.state.metrics.snapshot(),
            "active_requests": {
                "read": ctx.state.request_gate.active_reads(),
                "write": ctx.state.request_gate.active_writes(),
            },
        }],
        "truncated": false,
        "warnings": [],
    }))
}

async fn tool_health(ctx: &ToolContext) -> Result<Value> {
    let store = ctx.service.store();
    let store_health = {
        let store = store.lock().await;
        store.health().await
    };
    match store_health {
        Ok(()) => Ok(json!({
            "results": [{"healthy": true}],
            "truncated": false,
            "warnings": [],
        })),
        Err(e) => {
            let err = MnemoError::VectorStore(e);
            Ok(crate::server::budget::error_envelope(
                err.tool_code(),
                &format!("{}; run `mnemo recreate` to rebuild the collection", err),
                None,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_mode_denied_shape() {
        let denied = plan_mode_denied("create_entities");
        assert_eq!(denied["error"], "PLAN_MODE_ACCESS_DENIED");
        assert_eq!(denied["tool"], "create_entities");
        assert_eq!(denied["planModeActive"], true);
        let blocked: Vec<&str> = denied["blockedTools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(blocked.contains(&"create_entities"));
        assert!(denied["hint"].as_str().unwrap().contains("set_plan_mode"));
    }

    #[test]
    fn test_every_write_tool_is_gated() {
        // the gate list and the dispatch table must agree
        for tool in WRITE_TOOLS {
            assert!(
                matches!(
                    *tool,
                    "create_entities"
                        | "add_observations"
                        | "create_relations"
                        | "delete_entities"
                        | "delete_observations"
                        | "delete_relations"
                ),
                "unknown write tool {}",
                tool
            );
        }
    }
}
