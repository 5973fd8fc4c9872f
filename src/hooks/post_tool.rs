//! PostToolUse hook — enqueues a single-file re-index for the written
//! file and runs the fast quality catalog warn-only. Never blocks.

use std::time::Duration;

use super::quality::run_fast_rules;
use super::{run_with_deadline, HookEvent, HookOutcome, EXIT_ALLOW, EXIT_WARN};

const DEADLINE: Duration = Duration::from_millis(500);

/// Spawn a detached single-file index run. The hook does not wait: the
/// re-index is asynchronous work, the hook only enqueues it.
fn enqueue_reindex(file_path: &str) -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("index")
        .arg("--path")
        .arg(file_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

pub async fn run(input: &str) -> HookOutcome {
    run_with_deadline("post-tool", DEADLINE, async {
        let event = HookEvent::parse(input);
        let Some(path) = event.file_path() else {
            return Ok(HookOutcome::allow());
        };

        if let Err(e) = enqueue_reindex(path) {
            tracing::warn!("failed to enqueue re-index of {}: {}", path, e);
        } else {
            tracing::debug!("re-index enqueued for {}", path);
        }

        // Same catalog as pre-tool, but the edit already happened: the
        // strongest outcome here is a warning.
        let Some(content) = event.content() else {
            return Ok(HookOutcome::allow());
        };
        let findings = run_fast_rules(path, content);
        if findings.is_empty() {
            return Ok(HookOutcome::allow());
        }

        let payload = serde_json::json!({
            "decision": "warn",
            "findings": findings,
        });
        Ok(HookOutcome {
            exit_code: EXIT_WARN,
            stdout: payload.to_string(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_file_path_allows() {
        let outcome = run("{}").await;
        assert_eq!(outcome.exit_code, EXIT_ALLOW);
    }

    #[tokio::test]
    async fn test_findings_warn_but_never_block() {
        let input = serde_json::json!({
            "tool_name": "Write",
            "tool_input": {
                "file_path": "ci.sh",
                // blocking in pre-tool, only a warning after the fact
                "content": "git push --force origin main\n",
            },
        })
        .to_string();
        let outcome = run(&input).await;
        assert_eq!(outcome.exit_code, EXIT_WARN);
        assert!(outcome.stdout.contains("FORCE_PUSH"));
    }
}
