//! Retrieval server — line-delimited JSON-RPC 2.0 over TCP or stdio. Every
//! tool call is independent; connections proceed in parallel under the
//! concurrent-request gate.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use super::handlers::common::ToolContext;
use super::protocol::{DaemonRequest, DaemonResponse};
use super::state::DaemonState;
use super::tools;
use crate::error::MnemoError;

pub async fn serve_tcp(state: Arc<DaemonState>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("retrieval server listening on 127.0.0.1:{}", port);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("connection from {}", peer);
                let state = state.clone();
                tokio::spawn(async move {
                    let (reader, writer) = socket.into_split();
                    if let Err(e) = serve_stream(state, reader, writer).await {
                        tracing::debug!("connection ended: {}", e);
                    }
                });
            }
            _ = state.shutdown.cancelled() => {
                tracing::info!("retrieval server shutting down");
                return Ok(());
            }
        }
    }
}

/// Stdio bridge mode for editor integrations.
pub async fn serve_stdio(state: Arc<DaemonState>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve_stream(state, stdin, stdout).await
}

async fn serve_stream<R, W>(state: Arc<DaemonState>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = state.shutdown.cancelled() => return Ok(()),
        };
        let Some(line) = line else {
            return Ok(()); // EOF
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => handle_request(&state, request).await,
            Err(e) => DaemonResponse::error(Value::Null, -32700, format!("parse error: {}", e)),
        };

        let mut serialised = serde_json::to_string(&response)?;
        serialised.push('\n');
        writer.write_all(serialised.as_bytes()).await?;
        writer.flush().await?;
    }
}

async fn handle_request(state: &Arc<DaemonState>, request: DaemonRequest) -> DaemonResponse {
    let id = request.id.clone().unwrap_or(Value::Null);

    // Shutdown is the only method that does not need a collection.
    if request.method == "shutdown" {
        state.shutdown.cancel();
        return DaemonResponse::success(id, serde_json::json!({"stopping": true}));
    }

    // Write tools draw from the smaller admission pool.
    let class = if tools::WRITE_TOOLS.contains(&request.method.as_str()) {
        crate::resource_limits::RequestClass::Write
    } else {
        crate::resource_limits::RequestClass::Read
    };
    let _admission = match state.request_gate.try_admit(class) {
        Ok(admission) => admission,
        Err(e) => return DaemonResponse::error(id, -32000, e.to_string()),
    };

    let collection = request
        .collection()
        .map(str::to_string)
        .unwrap_or_else(|| state.default_collection.clone());
    let service = match state.service(&collection).await {
        Ok(service) => service,
        Err(e) => {
            return DaemonResponse::error(
                id,
                -32000,
                format!("collection '{}' unavailable: {}", collection, e),
            )
        }
    };

    let ctx = ToolContext {
        state: state.clone(),
        service,
    };
    match tools::dispatch(&request.method, request.params, &ctx).await {
        Ok(result) => DaemonResponse::success(id, result),
        Err(e) => match e.downcast::<MnemoError>() {
            Ok(mnemo_error) => DaemonResponse::from_mnemo_error(id, mnemo_error),
            Err(other) => DaemonResponse::error(id, -32603, other.to_string()),
        },
    }
}
