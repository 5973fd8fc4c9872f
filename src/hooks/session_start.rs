//! SessionStart hook — emits session context: a VCS summary and the
//! memory-first reminder.

use std::path::Path;
use std::time::Duration;

use super::{run_with_deadline, HookEvent, HookOutcome};

const DEADLINE: Duration = Duration::from_millis(500);

const MEMORY_FIRST_REMINDER: &str = "\
Memory-first: query the knowledge base (`search_similar`, `read_graph`, \
`search_docs`) before reading files or writing code — prior work, patterns \
and decisions are indexed.";

/// Light-weight VCS summary without shelling out: branch from .git/HEAD,
/// plus whether a merge or rebase is in flight.
pub fn vcs_summary(root: &Path) -> Option<String> {
    let git_dir = root.join(".git");
    let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let branch = head
        .trim()
        .strip_prefix("ref: refs/heads/")
        .unwrap_or("detached HEAD")
        .to_string();

    let mut notes = vec![format!("branch: {}", branch)];
    if git_dir.join("MERGE_HEAD").exists() {
        notes.push("merge in progress".to_string());
    }
    if git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists() {
        notes.push("rebase in progress".to_string());
    }
    Some(notes.join(", "))
}

pub async fn run(input: &str) -> HookOutcome {
    run_with_deadline("session-start", DEADLINE, async {
        let event = HookEvent::parse(input);
        let cwd = event
            .cwd
            .clone()
            .unwrap_or_else(|| ".".to_string());

        let mut context = String::new();
        if let Some(summary) = vcs_summary(Path::new(&cwd)) {
            context.push_str(&format!("Repository state — {}\n\n", summary));
        }
        context.push_str(MEMORY_FIRST_REMINDER);

        let collection = std::env::var("MNEMO_COLLECTION").unwrap_or_default();
        let payload = serde_json::json!({
            "additionalContext": context,
            "collection": collection,
        });
        Ok(HookOutcome {
            exit_code: super::EXIT_ALLOW,
            stdout: payload.to_string(),
        })
    })
    .await
}
