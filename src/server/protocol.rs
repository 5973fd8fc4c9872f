//! Shared JSON-RPC 2.0 protocol types for the daemon.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming JSON-RPC request from clients (CLI, editor bridge).
#[derive(Debug, Deserialize)]
pub struct DaemonRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl DaemonRequest {
    /// Tool calls carry the collection scope in params.
    pub fn collection(&self) -> Option<&str> {
        self.params.get("collection").and_then(|v| v.as_str())
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct DaemonResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DaemonResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn from_mnemo_error(id: Value, err: crate::error::MnemoError) -> Self {
        let (code, message) = err.into_rpc();
        Self::error(id, code, message)
    }
}
