//! Documentation-coverage rule — tasks touching user-facing surface area
//! need a doc task.

use super::{GuardrailRule, PlanContext, RuleCategory};
use crate::models::{PlanRevision, PlanValidationFinding, RevisionType, Severity, Task};

const USER_FACING_KEYWORDS: &[&str] = &[
    "api", "endpoint", "cli", "command", "ui", "interface", "public", "config option", "flag",
];

pub struct DocCoverageRule;

impl DocCoverageRule {
    fn is_user_facing(task: &Task) -> bool {
        let text = format!("{} {}", task.title, task.description).to_lowercase();
        USER_FACING_KEYWORDS.iter().any(|k| text.contains(k))
    }

    fn is_doc_task(task: &Task) -> bool {
        task.has_tag("docs")
            || task.has_tag("documentation")
            || task.title.to_lowercase().contains("document")
    }

    fn has_doc_coverage(task: &Task, ctx: &PlanContext) -> bool {
        ctx.plan
            .tasks
            .iter()
            .filter(|t| Self::is_doc_task(t))
            .any(|t| t.dependencies.iter().any(|d| d == &task.id))
    }
}

impl GuardrailRule for DocCoverageRule {
    fn rule_id(&self) -> &'static str {
        "PLAN.DOC_COVERAGE"
    }

    fn name(&self) -> &'static str {
        "Documentation coverage"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Coverage
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
            if !Self::is_user_facing(task) || Self::is_doc_task(task) {
                continue;
            }
            if Self::has_doc_coverage(task, ctx) {
                continue;
            }

            let mut finding = PlanValidationFinding {
                rule_id: self.rule_id().to_string(),
                severity: self.severity(ctx),
                summary: format!(
                    "task '{}' ({}) changes user-facing surface without a doc task",
                    task.title, task.id
                ),
                affected_tasks: vec![task.id.clone()],
                suggestion: Some(format!("add a documentation task depending on {}", task.id)),
                can_auto_revise: true,
                confidence: 0.75,
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
        let suffix = task_id.rsplit('-').next().unwrap_or(task_id);
        let new_task = Task {
            id: format!("TASK-DOC-{}", suffix),
            title: format!("Document: {}", task.title),
            description: format!("Update user documentation for '{}'.", task.title),
            scope: task.scope.clone(),
            priority: task.priority,
            dependencies: vec![task_id.clone()],
            tags: vec!["docs".to_string()],
            ..Default::default()
        };
        Some(PlanRevision {
            revision_type: RevisionType::AddTask,
            rationale: format!("user-facing task {} lacked documentation", task_id),
            target_task_id: None,
            new_task: Some(new_task),
            modifications: Default::default(),
            dependency_additions: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, task};
    use super::*;

    #[test]
    fn test_user_facing_without_docs_flagged() {
        let ctx = context(vec![task("TASK-007", "Add export endpoint to the API")]);
        let findings = DocCoverageRule.validate(&ctx);
        assert_eq!(findings.len(), 1);
        let new_task = findings[0]
            .suggested_revision
            .as_ref()
            .unwrap()
            .new_task
            .as_ref()
            .unwrap();
        assert_eq!(new_task.id, "TASK-DOC-007");
        assert!(new_task.has_tag("docs"));
    }

    #[test]
    fn test_internal_task_ignored() {
        let ctx = context(vec![task("TASK-001", "Refactor internal batch writer")]);
        assert!(DocCoverageRule.validate(&ctx).is_empty());
    }

    #[test]
    fn test_doc_task_itself_ignored() {
        let mut doc = task("TASK-002", "Document the CLI");
        doc.tags = vec!["docs".into()];
        let ctx = context(vec![doc]);
        assert!(DocCoverageRule.validate(&ctx).is_empty());
    }
}
