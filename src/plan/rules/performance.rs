//! Performance-pattern rule — lexical detection of known anti-patterns in
//! task text.

use std::sync::OnceLock;

use regex::Regex;

use super::{GuardrailRule, PlanContext, RuleCategory};
use crate::models::{PlanRevision, PlanValidationFinding, RevisionType, Severity};

struct AntiPattern {
    label: &'static str,
    advice: &'static str,
    regex: &'static str,
}

const ANTI_PATTERNS: &[AntiPattern] = &[
    AntiPattern {
        label: "N+1 query",
        advice: "batch the lookups or add a join",
        regex: r"(?i)\bn\s*\+\s*1\b|query (?:per|for each|inside (?:the |a )?loop)",
    },
    AntiPattern {
        label: "missing cache",
        advice: "add a cache in front of the repeated fetch",
        regex: r"(?i)without cach|no cach|re-?fetch(?:es|ing)? (?:every|each|on every)",
    },
    AntiPattern {
        label: "blocking call in hot path",
        advice: "move the blocking call off the hot path",
        regex: r"(?i)blocking (?:call|io|request).{0,40}(?:hot path|request path|per request)|synchronous(?:ly)? (?:in|on) (?:the )?(?:hot|request) path",
    },
    AntiPattern {
        label: "unbounded load",
        advice: "paginate or bound the result set",
        regex: r"(?i)load(?:s|ing)? (?:all|every|the entire)|fetch(?:es|ing)? (?:all|everything)|select \*",
    },
    AntiPattern {
        label: "oversized payload",
        advice: "stream or chunk the payload",
        regex: r"(?i)(?:entire|whole|full) (?:file|payload|response|table) in (?:memory|one)|base64 the",
    },
];

fn compiled() -> &'static Vec<(&'static AntiPattern, Regex)> {
    static COMPILED: OnceLock<Vec<(&'static AntiPattern, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ANTI_PATTERNS
            .iter()
            .map(|p| (p, Regex::new(p.regex).expect("anti-pattern regex")))
            .collect()
    })
}

pub struct PerformancePatternRule;

impl GuardrailRule for PerformancePatternRule {
    fn rule_id(&self) -> &'static str {
        "PLAN.PERFORMANCE_PATTERN"
    }

    fn name(&self) -> &'static str {
        "Performance patterns"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Performance
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn is_fast(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &PlanContext) -> Vec<PlanValidationFinding> {
        let mut findings = Vec::new();
        for task in &ctx.plan.tasks {
            let text = format!("{} {}", task.title, task.description);
            let hits: Vec<&AntiPattern> = compiled()
                .iter()
                .filter(|(_, regex)| regex.is_match(&text))
                .map(|(pattern, _)| *pattern)
                .collect();
            if hits.is_empty() {
                continue;
            }

            let labels: Vec<&str> = hits.iter().map(|p| p.label).collect();
            let advice: Vec<&str> = hits.iter().map(|p| p.advice).collect();
            let mut finding = PlanValidationFinding {
                rule_id: self.rule_id().to_string(),
                severity: self.severity(ctx),
                summary: format!(
                    "task '{}' describes performance anti-pattern(s): {}",
                    task.id,
                    labels.join(", ")
                ),
                affected_tasks: vec![task.id.clone()],
                suggestion: Some(advice.join("; ")),
                can_auto_revise: true,
                confidence: 0.8,
                suggested_revision: None,
            };
            finding.suggested_revision = self.suggest_revision(&finding, ctx);
            findings.push(finding);
        }
        findings
    }

    fn suggest_revision(
        &self,
        finding: &PlanValidationFinding,
        ctx: &PlanContext,
    ) -> Option<PlanRevision> {
        let task_id = finding.affected_tasks.first()?;
        let task = ctx.plan.task(task_id)?;
        let mut modifications = serde_json::Map::new();
        modifications.insert(
            "description".into(),
            format!(
                "{}\n\nPerformance note: {}. {}",
                task.description,
                finding.summary,
                finding.suggestion.as_deref().unwrap_or_default()
            )
            .into(),
        );
        Some(PlanRevision {
            revision_type: RevisionType::ModifyTask,
            rationale: "performance anti-pattern detected in task text".into(),
            target_task_id: Some(task_id.clone()),
            new_task: None,
            modifications,
            dependency_additions: vec![],
        })
    }
}
