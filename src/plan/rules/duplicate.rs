//! Duplicate-detection rule — semantic-memory search over each creation
//! task's title and description. Not fast: it touches the knowledge base.

use super::{GuardrailRule, PlanContext, RuleCategory};
use crate::models::{PlanRevision, PlanValidationFinding, RevisionType, Severity, Task};

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.70;
const CREATION_KEYWORDS: &[&str] = &["implement", "create", "add", "build", "write", "introduce"];

pub struct DuplicateDetectionRule;

impl DuplicateDetectionRule {
    fn is_creation_task(task: &Task) -> bool {
        let text = task.title.to_lowercase();
        CREATION_KEYWORDS.iter().any(|k| text.contains(k))
    }
}

impl GuardrailRule for DuplicateDetectionRule {
    fn rule_id(&self) -> &'static str {
        "PLAN.DUPLICATE_DETECTION"
    }

    fn name(&self) -> &'static str {
        "Duplicate detection"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Consistency
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn is_fast(&self) -> bool {
        false
    }

    fn validate(&self, ctx: &PlanContext) -> Vec<PlanValidationFinding> {
        let Some(memory) = &ctx.memory else {
            return Vec::new(); // no knowledge base wired in, nothing to compare against
        };
        let threshold = ctx
            .config
            .threshold_for(self.rule_id(), DEFAULT_SIMILARITY_THRESHOLD);

        let mut findings = Vec::new();
        for task in &ctx.plan.tasks {
            if !Self::is_creation_task(task) {
                continue;
            }
            let query = format!("{} {}", task.title, task.description);
            let hits = memory.search(&query, 3);
            let Some((existing, similarity)) = hits.into_iter().find(|(_, s)| *s >= threshold)
            else {
                continue;
            };

            let mut finding = PlanValidationFinding {
                rule_id: self.rule_id().to_string(),
                severity: self.severity(ctx),
                summary: format!(
                    "task '{}' ({}) resembles existing '{}' ({:.0}% similar)",
                    task.title,
                    task.id,
                    existing,
                    similarity * 100.0
                ),
                affected_tasks: vec![task.id.clone()],
                suggestion: Some(format!(
                    "review '{}' before implementing; extend it instead of duplicating",
                    existing
                )),
                can_auto_revise: true,
                // similarity is the confidence that this is a duplicate
                confidence: similarity,
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
        let existing = finding
            .summary
            .split('\'')
            .nth(3)
            .unwrap_or("the existing entity")
            .to_string();

        let mut modifications = serde_json::Map::new();
        modifications.insert(
            "description".into(),
            format!(
                "{}\n\nNote: similar functionality exists in {}; verify before implementing.",
                task.description, existing
            )
            .into(),
        );
        let mut criteria = task.acceptance_criteria.clone();
        criteria.push("verified no duplication".to_string());
        modifications.insert(
            "acceptance_criteria".into(),
            serde_json::to_value(criteria).ok()?,
        );

        Some(PlanRevision {
            revision_type: RevisionType::ModifyTask,
            rationale: format!("task {} may duplicate {}", task_id, existing),
            target_task_id: Some(task_id.clone()),
            new_task: None,
            modifications,
            dependency_additions: vec![],
        })
    }
}
