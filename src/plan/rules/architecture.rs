//! Architectural-consistency rule — declared file paths checked against
//! the project's canonical location table.

use super::{GuardrailRule, PlanContext, RuleCategory};
use crate::models::{PlanRevision, PlanValidationFinding, RevisionType, Severity};

/// Canonical locations: `(category, keyword hints, expected path fragments)`.
const LOCATION_TABLE: &[(&str, &[&str], &[&str])] = &[
    ("tests", &["test", "spec"], &["tests/", "test/", "__tests__/"]),
    ("components", &["component", "widget", "view"], &["components/"]),
    ("services", &["service", "client", "gateway"], &["services/"]),
    ("api", &["route", "endpoint", "handler"], &["api/", "routes/"]),
    ("models", &["model", "schema", "entity"], &["models/"]),
    ("utils", &["util", "helper"], &["utils/", "lib/"]),
    ("config", &["config", "settings"], &["config/", ".config/"]),
];

pub struct ArchitecturalConsistencyRule;

impl ArchitecturalConsistencyRule {
    /// Expected category of a file, judged from its name.
    fn expected_category(path: &str) -> Option<&'static (&'static str, &'static [&'static str], &'static [&'static str])> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        LOCATION_TABLE
            .iter()
            .find(|(_, hints, _)| hints.iter().any(|h| file_name.contains(h)))
    }

    fn in_expected_location(path: &str, fragments: &[&str]) -> bool {
        let lowered = path.to_lowercase();
        fragments.iter().any(|f| lowered.contains(f))
    }
}

impl GuardrailRule for ArchitecturalConsistencyRule {
    fn rule_id(&self) -> &'static str {
        "PLAN.ARCHITECTURAL_CONSISTENCY"
    }

    fn name(&self) -> &'static str {
        "Architectural consistency"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Architecture
    }

    fn default_severity(&self) -> Severity {
        Severity::Low
    }

    fn is_fast(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &PlanContext) -> Vec<PlanValidationFinding> {
        let mut findings = Vec::new();
        for task in &ctx.plan.tasks {
            let mut misplaced = Vec::new();
            for path in &task.file_paths {
                if let Some((category, _, fragments)) = Self::expected_category(path) {
                    if !Self::in_expected_location(path, fragments) {
                        misplaced.push((path.clone(), *category, fragments[0]));
                    }
                }
            }
            if misplaced.is_empty() {
                continue;
            }

            let listing = misplaced
                .iter()
                .map(|(path, category, expected)| {
                    format!("{} looks like {} code, expected under {}", path, category, expected)
                })
                .collect::<Vec<_>>()
                .join("; ");
            let mut finding = PlanValidationFinding {
                rule_id: self.rule_id().to_string(),
                severity: self.severity(ctx),
                summary: format!("task '{}' declares non-standard locations: {}", task.id, listing),
                affected_tasks: vec![task.id.clone()],
                suggestion: Some("move the files to the project's canonical locations".into()),
                can_auto_revise: true,
                confidence: 0.75,
                suggested_revision: None,
            };
            finding.suggested_revision = self.suggest_revision(&finding, ctx);
            findings.push(finding);
        }
        findings
    }

    /// Non-standard locations get a warning note on the task, nothing more
    /// invasive.
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
            format!("{}\n\nLocation note: {}", task.description, finding.summary).into(),
        );
        Some(PlanRevision {
            revision_type: RevisionType::ModifyTask,
            rationale: "declared file paths deviate from canonical locations".into(),
            target_task_id: Some(task_id.clone()),
            new_task: None,
            modifications,
            dependency_additions: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, task};
    use super::*;

    #[test]
    fn test_misplaced_test_file_flagged() {
        let mut t = task("TASK-001", "Add auth checks");
        t.file_paths = vec!["src/auth/test_login.py".into()];
        let ctx = context(vec![t]);
        let findings = ArchitecturalConsistencyRule.validate(&ctx);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].summary.contains("tests"));
        let revision = findings[0].suggested_revision.as_ref().unwrap();
        assert_eq!(revision.revision_type, RevisionType::ModifyTask);
    }

    #[test]
    fn test_canonical_location_passes() {
        let mut t = task("TASK-001", "Add auth checks");
        t.file_paths = vec![
            "tests/test_login.py".into(),
            "src/services/auth_service.py".into(),
            "src/components/LoginForm.tsx".into(),
        ];
        let ctx = context(vec![t]);
        assert!(ArchitecturalConsistencyRule.validate(&ctx).is_empty());
    }

    #[test]
    fn test_unclassifiable_path_ignored() {
        let mut t = task("TASK-001", "Add auth checks");
        t.file_paths = vec!["src/main.py".into()];
        let ctx = context(vec![t]);
        assert!(ArchitecturalConsistencyRule.validate(&ctx).is_empty());
    }
}
