//! `search_tickets` / `get_ticket` — read-through access to the external
//! issue tracker.

use anyhow::Result;
use serde_json::{json, Value};

use super::common::{arg_str, require_str, ToolContext};
use crate::models::{TicketEntity, TicketStatus};
use crate::server::budget::{error_envelope, ResponseBuilder};
use crate::tickets::TicketFilters;

fn ticket_row(ticket: &TicketEntity, score: f64) -> Value {
    json!({
        "id": ticket.id,
        "source": ticket.source.as_str(),
        "title": ticket.title,
        "description": ticket.description,
        "status": ticket.status.as_str(),
        "labels": ticket.labels,
        "priority": ticket.priority,
        "acceptance_criteria": ticket.acceptance_criteria,
        "linked_prs": ticket.linked_prs,
        "score": score,
    })
}

pub async fn tool_search_tickets(args: Value, ctx: &ToolContext) -> Result<Value> {
    let query = require_str(&args, "query")?;
    if !ctx.state.tickets.is_configured() {
        return Ok(error_envelope(
            "TRACKER_UNCONFIGURED",
            "no ticket tracker configured; set one up in .mnemo/config.toml",
            None,
        ));
    }

    let filters = TicketFilters {
        status: arg_str(&args, "status").map(TicketStatus::normalize),
        labels: args
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));
    match ctx.state.tickets.search(query, &filters).await {
        Ok(tickets) => {
            for (rank, ticket) in tickets.iter().enumerate() {
                let score = 1.0 / (rank as f64 + 1.0);
                if !builder.push(ticket_row(ticket, score)) {
                    break;
                }
            }
            Ok(builder.into_envelope())
        }
        Err(e) => Ok(error_envelope("TRACKER_UNAVAILABLE", &e.to_string(), None)),
    }
}

pub async fn tool_get_ticket(args: Value, ctx: &ToolContext) -> Result<Value> {
    let id = require_str(&args, "id")?;
    if !ctx.state.tickets.is_configured() {
        return Ok(error_envelope(
            "TRACKER_UNCONFIGURED",
            "no ticket tracker configured; set one up in .mnemo/config.toml",
            None,
        ));
    }

    let mut builder = ResponseBuilder::new(ctx.budget_tokens(&args));
    match ctx.state.tickets.get(id).await {
        Ok(Some(ticket)) => {
            builder.push(ticket_row(&ticket, 1.0));
            Ok(builder.into_envelope())
        }
        Ok(None) => {
            builder.warn(format!("ticket '{}' not found", id));
            Ok(builder.into_envelope())
        }
        Err(e) => Ok(error_envelope("TRACKER_UNAVAILABLE", &e.to_string(), None)),
    }
}
