//! PreToolUse hook — runs the fast quality catalog against a proposed
//! edit. Exit 0 allows, 1 warns, 2 blocks; a blocking finding prints a
//! structured reason. Budget: 300 ms.

use std::time::Duration;

use super::quality::run_fast_rules;
use super::{run_with_deadline, HookEvent, HookOutcome, EXIT_ALLOW, EXIT_BLOCK, EXIT_WARN};

const DEADLINE: Duration = Duration::from_millis(300);

pub async fn run(input: &str) -> HookOutcome {
    run_with_deadline("pre-tool", DEADLINE, async {
        let event = HookEvent::parse(input);
        let (Some(path), Some(content)) = (event.file_path(), event.content()) else {
            return Ok(HookOutcome::allow()); // nothing to inspect
        };

        let findings = run_fast_rules(path, content);
        if findings.is_empty() {
            return Ok(HookOutcome::allow());
        }

        let blocking: Vec<_> = findings.iter().filter(|f| f.is_blocking()).collect();
        let exit_code = if blocking.is_empty() { EXIT_WARN } else { EXIT_BLOCK };

        let payload = serde_json::json!({
            "decision": if exit_code == EXIT_BLOCK { "block" } else { "warn" },
            "tool": event.tool_name,
            "findings": findings,
            "reason": findings
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        });
        Ok(HookOutcome {
            exit_code,
            stdout: payload.to_string(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, content: &str) -> String {
        serde_json::json!({
            "tool_name": "Write",
            "tool_input": {"file_path": path, "content": content},
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_clean_edit_allowed() {
        let outcome = run(&event("a.py", "def f():\n    return 1\n")).await;
        assert_eq!(outcome.exit_code, EXIT_ALLOW);
    }

    #[tokio::test]
    async fn test_swallowed_exception_warns() {
        let outcome = run(&event("a.py", "try:\n    x()\nexcept:\n    pass\n")).await;
        assert_eq!(outcome.exit_code, EXIT_WARN);
        assert!(outcome.stdout.contains("SWALLOWED_EXCEPTION"));
    }

    #[tokio::test]
    async fn test_force_push_to_main_blocks_with_reason() {
        let outcome = run(&event("ci.sh", "git push --force origin main\n")).await;
        assert_eq!(outcome.exit_code, EXIT_BLOCK);
        let payload: serde_json::Value = serde_json::from_str(&outcome.stdout).unwrap();
        assert_eq!(payload["decision"], "block");
        assert!(payload["reason"].as_str().unwrap().contains("force push"));
    }

    #[tokio::test]
    async fn test_event_without_content_allowed() {
        let outcome = run(r#"{"tool_name": "Read", "tool_input": {"file_path": "a.py"}}"#).await;
        assert_eq!(outcome.exit_code, EXIT_ALLOW);
    }
}
