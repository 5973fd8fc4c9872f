//! Hook execution framework — short-lived subcommands fed one JSON event
//! record on stdin. Every hook runs under a deadline and fails open: an
//! internal error never blocks the underlying operation.

pub mod post_tool;
pub mod pre_tool;
pub mod prompt;
pub mod quality;
pub mod session_start;

use std::time::Duration;

use serde::Deserialize;

/// Exit codes shared by all hooks. `Block` is only meaningful for
/// pre-tool-use; everything else maps to allow.
pub const EXIT_ALLOW: i32 = 0;
pub const EXIT_WARN: i32 = 1;
pub const EXIT_BLOCK: i32 = 2;

/// The event record hooks receive on stdin. Unknown fields are ignored so
/// newer callers keep working.
#[derive(Debug, Default, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

impl HookEvent {
    pub fn parse(input: &str) -> Self {
        serde_json::from_str(input).unwrap_or_default()
    }

    /// File path of the edit being proposed/made, if any.
    pub fn file_path(&self) -> Option<&str> {
        self.tool_input.get("file_path").and_then(|v| v.as_str())
    }

    /// Written or proposed content, whichever field the tool uses.
    pub fn content(&self) -> Option<&str> {
        for key in ["content", "new_string", "new_source", "text"] {
            if let Some(content) = self.tool_input.get(key).and_then(|v| v.as_str()) {
                return Some(content);
            }
        }
        None
    }
}

/// What a hook wants the caller to do.
#[derive(Debug, PartialEq)]
pub struct HookOutcome {
    pub exit_code: i32,
    /// Printed to stdout; stderr is reserved for logs.
    pub stdout: String,
}

impl HookOutcome {
    pub fn allow() -> Self {
        Self {
            exit_code: EXIT_ALLOW,
            stdout: String::new(),
        }
    }
}

/// Run a hook body under its deadline, failing open on error or overrun.
/// The decision path never touches the network.
pub async fn run_with_deadline<F>(name: &str, deadline: Duration, body: F) -> HookOutcome
where
    F: std::future::Future<Output = anyhow::Result<HookOutcome>>,
{
    match tokio::time::timeout(deadline, body).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            // Fail open, but never silently: the structured log line is
            // the audit trail.
            tracing::warn!(hook = name, error = %e, "hook failed, allowing operation");
            HookOutcome::allow()
        }
        Err(_) => {
            tracing::warn!(hook = name, ?deadline, "hook deadline exceeded, allowing operation");
            HookOutcome::allow()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parse_tolerates_garbage() {
        let event = HookEvent::parse("not json at all");
        assert!(event.prompt.is_none());
        assert!(event.tool_name.is_none());
    }

    #[test]
    fn test_event_parse_unknown_fields_ignored() {
        let event = HookEvent::parse(
            r#"{"prompt": "hi", "hook_event_name": "UserPromptSubmit", "future_field": 1}"#,
        );
        assert_eq!(event.prompt.as_deref(), Some("hi"));
    }

    #[test]
    fn test_content_field_fallbacks() {
        let event = HookEvent::parse(r#"{"tool_input": {"file_path": "a.py", "new_string": "x = 1"}}"#);
        assert_eq!(event.file_path(), Some("a.py"));
        assert_eq!(event.content(), Some("x = 1"));
    }

    #[tokio::test]
    async fn test_deadline_overrun_fails_open() {
        let outcome = run_with_deadline("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HookOutcome {
                exit_code: EXIT_BLOCK,
                stdout: "should never be seen".into(),
            })
        })
        .await;
        assert_eq!(outcome.exit_code, EXIT_ALLOW);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_internal_error_fails_open() {
        let outcome = run_with_deadline("broken", Duration::from_secs(1), async {
            anyhow::bail!("internal failure")
        })
        .await;
        assert_eq!(outcome.exit_code, EXIT_ALLOW);
    }

    #[tokio::test]
    async fn test_block_outcome_passes_through_within_deadline() {
        let outcome = run_with_deadline("fast", Duration::from_secs(1), async {
            Ok(HookOutcome {
                exit_code: EXIT_BLOCK,
                stdout: "reason".into(),
            })
        })
        .await;
        assert_eq!(outcome.exit_code, EXIT_BLOCK);
    }
}
