//! Unified error type for the mnemo daemon — maps internal errors to JSON-RPC
//! codes and stable tool-level error codes.

use thiserror::Error;

/// Standard JSON-RPC 2.0 error codes.
const PARSE_ERROR: i32 = -32700;
const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;
/// Application-level server error (implementation-defined).
const SERVER_ERROR: i32 = -32000;

#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Parse error: {0}")]
    #[allow(dead_code)]
    ParseError(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("State error: {0}")]
    State(#[from] crate::storage::state::StateError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] crate::storage::vector::VectorStoreError),

    #[error("Embedder error: {0}")]
    Embedder(#[from] crate::embedder::EmbedderError),

    #[error("Parser error: {0}")]
    Parser(#[from] crate::parsers::ParserError),

    #[error("Plan mode active: tool '{0}' is write-blocked")]
    PlanModeDenied(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl MnemoError {
    /// JSON-RPC error code for this error variant.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::ParseError(_) => PARSE_ERROR,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::State(_)
            | Self::VectorStore(_)
            | Self::Embedder(_)
            | Self::Parser(_)
            | Self::PlanModeDenied(_) => SERVER_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Stable tool-level error code carried inside result envelopes.
    /// Lets callers distinguish a dead store from an empty result set.
    pub fn tool_code(&self) -> &'static str {
        match self {
            Self::PlanModeDenied(_) => "PLAN_MODE_ACCESS_DENIED",
            Self::VectorStore(e) if e.is_corruption() => "COLLECTION_CORRUPT",
            Self::VectorStore(_) => "STORE_UNAVAILABLE",
            Self::Embedder(_) => "EMBEDDER_UNAVAILABLE",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            _ => "INTERNAL",
        }
    }

    /// Convert to (code, message) pair for DaemonResponse::error.
    pub fn into_rpc(self) -> (i32, String) {
        let code = self.rpc_code();
        (code, self.to_string())
    }
}
