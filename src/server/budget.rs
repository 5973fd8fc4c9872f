//! Token-budgeted response building — an incremental writer with a running
//! estimate and a commit/rollback boundary at each candidate.

use serde_json::Value;

/// Byte-pair-style token estimate: roughly four bytes per token, never less
/// than the word count. The estimate errs high relative to real tokenisers
/// so the builder stays conservative.
pub fn estimate_tokens(text: &str) -> usize {
    let by_bytes = text.len().div_ceil(4);
    let by_words = text.split_whitespace().count();
    by_bytes.max(by_words)
}

/// Accumulates serialised candidates until the budget would be exceeded.
pub struct ResponseBuilder {
    budget_tokens: usize,
    used_tokens: usize,
    results: Vec<Value>,
    truncated: bool,
    warnings: Vec<String>,
}

impl ResponseBuilder {
    pub fn new(budget_tokens: usize) -> Self {
        Self {
            budget_tokens,
            used_tokens: 0,
            results: Vec::new(),
            truncated: false,
            warnings: Vec::new(),
        }
    }

    /// Try to add one candidate. Returns false (and marks the response
    /// truncated) once the budget is exhausted; the candidate that did not
    /// fit is rolled back, not half-written.
    pub fn push(&mut self, candidate: Value) -> bool {
        if self.truncated {
            return false;
        }
        let serialised = candidate.to_string();
        let cost = estimate_tokens(&serialised);
        if self.used_tokens + cost > self.budget_tokens {
            self.truncated = true;
            return false;
        }
        self.used_tokens += cost;
        self.results.push(candidate);
        true
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn used_tokens(&self) -> usize {
        self.used_tokens
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The stable tool envelope: `{results, truncated, warnings, error?}`.
    pub fn into_envelope(self) -> Value {
        serde_json::json!({
            "results": self.results,
            "truncated": self.truncated,
            "warnings": self.warnings,
        })
    }
}

/// Envelope for a failed tool call, distinguishable from zero results.
pub fn error_envelope(code: &str, message: &str, details: Option<Value>) -> Value {
    let mut error = serde_json::json!({
        "code": code,
        "message": message,
    });
    if let Some(details) = details {
        error["details"] = details;
    }
    serde_json::json!({
        "results": [],
        "truncated": false,
        "warnings": [],
        "error": error,
    })
}
