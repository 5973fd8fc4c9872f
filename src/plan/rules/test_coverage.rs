//! Test-coverage rule — feature-like tasks need a linked test task.

use super::{GuardrailRule, PlanContext, RuleCategory};
use crate::models::{PlanRevision, PlanValidationFinding, RevisionType, Severity, Task};

const FEATURE_KEYWORDS: &[&str] = &[
    "implement", "add", "create", "build", "feature", "support", "integrate", "introduce",
];
const TRIVIAL_KEYWORDS: &[&str] = &[
    "typo", "rename", "comment", "formatting", "format", "docs only", "doc-only", "whitespace",
];

pub struct TestCoverageRule;

impl TestCoverageRule {
    fn is_feature_task(task: &Task) -> bool {
        let text = format!("{} {}", task.title, task.description).to_lowercase();
        FEATURE_KEYWORDS.iter().any(|k| text.contains(k))
    }

    fn is_trivial_task(task: &Task) -> bool {
        let text = format!("{} {}", task.title, task.description).to_lowercase();
        TRIVIAL_KEYWORDS.iter().any(|k| text.contains(k))
    }

    fn is_test_task(task: &Task) -> bool {
        task.has_tag("testing")
            || task.has_tag("test")
            || task.title.to_lowercase().contains("test")
    }

    fn has_test_coverage(task: &Task, ctx: &PlanContext) -> bool {
        ctx.plan
            .tasks
            .iter()
            .filter(|t| Self::is_test_task(t))
            .any(|t| t.dependencies.iter().any(|d| d == &task.id))
    }

    fn test_task_id(task_id: &str) -> String {
        let suffix = task_id.rsplit('-').next().unwrap_or(task_id);
        format!("TASK-TST-{}", suffix)
    }
}

impl GuardrailRule for TestCoverageRule {
    fn rule_id(&self) -> &'static str {
        "PLAN.TEST_COVERAGE"
    }

    fn name(&self) -> &'static str {
        "Test coverage"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Coverage
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn is_fast(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &PlanContext) -> Vec<PlanValidationFinding> {
        let mut findings = Vec::new();
        for task in &ctx.plan.tasks {
            if !Self::is_feature_task(task) || Self::is_trivial_task(task) {
                continue;
            }
            if Self::is_test_task(task) || Self::has_test_coverage(task, ctx) {
                continue;
            }

            let mut finding = PlanValidationFinding {
                rule_id: self.rule_id().to_string(),
                severity: self.severity(ctx),
                summary: format!("task '{}' ({}) has no linked test task", task.title, task.id),
                affected_tasks: vec![task.id.clone()],
                suggestion: Some(format!(
                    "add a test task depending on {} covering its acceptance criteria",
                    task.id
                )),
                can_auto_revise: true,
                confidence: 0.85,
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
        let new_task = Task {
            id: Self::test_task_id(task_id),
            title: format!("Test: {}", task.title),
            description: format!("Cover '{}' with automated tests.", task.title),
            scope: task.scope.clone(),
            priority: task.priority,
            dependencies: vec![task_id.clone()],
            tags: vec!["testing".to_string()],
            acceptance_criteria: vec![format!(
                "tests exercise the acceptance criteria of {}",
                task_id
            )],
            ..Default::default()
        };
        Some(PlanRevision {
            revision_type: RevisionType::AddTask,
            rationale: format!("feature task {} lacked test coverage", task_id),
            target_task_id: None,
            new_task: Some(new_task),
            modifications: Default::default(),
            dependency_additions: vec![],
        })
    }
}
