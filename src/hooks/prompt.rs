//! UserPromptSubmit hook — detects planning intent and, when found,
//! prepends planning guidelines and exploration hints to the model's
//! context.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::{run_with_deadline, HookEvent, HookOutcome};
use crate::server::state::parse_bool;

const DEADLINE: Duration = Duration::from_millis(500);
const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Explicit markers — 1.0 confidence.
fn explicit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)@agent-plan|@plan\b|--plan\b|plan\s*mode").unwrap())
}

/// Verb+plan keyword patterns — 0.7 base confidence.
fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:create|make|write|draft|build|prepare)\s+(?:a\s+|an\s+|the\s+)?(?:implementation\s+|detailed\s+|step[- ]by[- ]step\s+)?plan\b")
            .unwrap()
    })
}

const BOOST_KEYWORDS: &[&str] = &["step", "roadmap", "milestone", "architecture", "breakdown", "phases"];
const NEGATIVE_KEYWORDS: &[&str] = &["floor plan", "plan b", "planet", "seating plan"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    ExplicitMarker,
    Environment,
    Keywords,
    None,
}

#[derive(Debug, Serialize)]
pub struct PlanIntentResult {
    pub detected: bool,
    pub confidence: f64,
    pub source: DetectionSource,
}

/// Detection order: explicit markers, then environment, then scored
/// keywords.
pub fn detect_plan_intent(prompt: &str) -> PlanIntentResult {
    if explicit_re().is_match(prompt) {
        return PlanIntentResult {
            detected: true,
            confidence: 1.0,
            source: DetectionSource::ExplicitMarker,
        };
    }

    if std::env::var("PLAN_MODE").map(|v| parse_bool(&v)).unwrap_or(false) {
        return PlanIntentResult {
            detected: true,
            confidence: 1.0,
            source: DetectionSource::Environment,
        };
    }

    if keyword_re().is_match(prompt) {
        let lowered = prompt.to_lowercase();
        let mut confidence: f64 = 0.7;
        for boost in BOOST_KEYWORDS {
            if lowered.contains(boost) {
                confidence += 0.05;
            }
        }
        for negative in NEGATIVE_KEYWORDS {
            if lowered.contains(negative) {
                confidence -= 0.2;
            }
        }
        let confidence = confidence.clamp(0.0, 1.0);
        return PlanIntentResult {
            detected: confidence >= CONFIDENCE_THRESHOLD,
            confidence,
            source: DetectionSource::Keywords,
        };
    }

    PlanIntentResult {
        detected: false,
        confidence: 0.0,
        source: DetectionSource::None,
    }
}

const PLANNING_GUIDELINES: &str = "\
## Planning guidelines
- Break the work into tasks with explicit ids, dependencies and acceptance criteria.
- Every feature task needs a linked test task; user-facing changes need a doc task.
- Search the knowledge base before creating anything: similar code may already exist.
- Declare the files each task touches so location checks can run.";

const EXPLORATION_HINTS: &str = "\
## Exploration hints
- `search_similar` finds related functions and docs (hybrid mode by default).
- `read_graph` shows how entities connect; `get_implementation` expands bodies on demand.
- `search_docs` surfaces specs, PRDs and ADRs relevant to the plan.";

/// Entry point for the `hook prompt` subcommand.
pub async fn run(input: &str) -> HookOutcome {
    run_with_deadline("prompt", DEADLINE, async {
        let event = HookEvent::parse(input);
        let prompt = event.prompt.as_deref().unwrap_or("");
        let result = detect_plan_intent(prompt);
        tracing::info!(
            detected = result.detected,
            confidence = result.confidence,
            "plan intent detection"
        );

        if !result.detected {
            return Ok(HookOutcome::allow());
        }

        let payload = serde_json::json!({
            "detection": result,
            "additionalContext": format!("{}\n\n{}", PLANNING_GUIDELINES, EXPLORATION_HINTS),
        });
        Ok(HookOutcome {
            exit_code: super::EXIT_ALLOW,
            stdout: payload.to_string(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_markers_full_confidence() {
        for prompt in [
            "@plan add rate limiting",
            "use --plan for this",
            "enter plan mode and review",
            "@agent-plan design the schema",
        ] {
            let result = detect_plan_intent(prompt);
            assert!(result.detected, "{} should detect", prompt);
            assert!((result.confidence - 1.0).abs() < f64::EPSILON);
            assert_eq!(result.source, DetectionSource::ExplicitMarker);
        }
    }

    #[test]
    fn test_keyword_detection_with_boost() {
        let result = detect_plan_intent("create a plan with milestones and a step breakdown");
        assert!(result.detected);
        assert_eq!(result.source, DetectionSource::Keywords);
        assert!(result.confidence > 0.7);
    }

    #[test]
    fn test_negative_keywords_damp() {
        let result = detect_plan_intent("draft a plan b for the seating plan");
        assert!(!result.detected);
        assert!(result.confidence < CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn test_plain_prompt_no_detection() {
        let result = detect_plan_intent("fix the login bug in auth.py");
        assert!(!result.detected);
        assert_eq!(result.source, DetectionSource::None);
    }

    #[tokio::test]
    async fn test_run_emits_guidelines_on_detection() {
        let outcome = run(r#"{"prompt": "@plan add exports"}"#).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("Planning guidelines"));
        assert!(outcome.stdout.contains("Exploration hints"));
    }

    #[tokio::test]
    async fn test_run_quiet_without_detection() {
        let outcome = run(r#"{"prompt": "rename a variable"}"#).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.is_empty());
    }
}
