//! Auto-revision engine — applies suggested revisions with conflict and
//! cycle protection, bounded iterations and a full audit trail.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::config::PlanGuardrailConfig;
use crate::models::{
    AppliedRevision, ImplementationPlan, PlanRevision, PlanValidationFinding, RevisedPlan,
    RevisionType, Task,
};

pub struct AutoRevisionEngine {
    config: PlanGuardrailConfig,
}

impl AutoRevisionEngine {
    pub fn new(config: PlanGuardrailConfig) -> Self {
        Self { config }
    }

    /// Apply auto-revisions for the findings that qualify. Each pass sorts
    /// by severity then the fixed revision-type order, applies what passes
    /// the conflict checks, then re-resolves dependencies. Convergence is
    /// bounded by `max_iterations` and `max_revisions_per_plan`.
    pub fn revise_plan(
        &self,
        plan: &ImplementationPlan,
        findings: &[PlanValidationFinding],
    ) -> RevisedPlan {
        let started = Instant::now();
        let mut current = plan.clone();
        let mut applied: Vec<AppliedRevision> = Vec::new();
        let mut skipped: Vec<(PlanRevision, String)> = Vec::new();
        let mut iterations_used = 0u32;

        if !self.config.auto_revise {
            return RevisedPlan {
                original_plan: plan.clone(),
                revised_plan: current,
                revisions_applied: applied,
                revisions_skipped: skipped,
                iterations_used,
                total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
        }

        let revisable: Vec<&PlanValidationFinding> = findings
            .iter()
            .filter(|f| {
                f.can_auto_revise
                    && f.suggested_revision.is_some()
                    && self.config.should_auto_revise(f.confidence)
                    && self.config.is_rule_enabled(&f.rule_id)
            })
            .collect();

        let mut processed: HashSet<String> = HashSet::new();

        for iteration in 0..self.config.max_iterations {
            if applied.len() >= self.config.max_revisions_per_plan {
                break;
            }

            let mut pending: Vec<&PlanValidationFinding> = revisable
                .iter()
                .copied()
                .filter(|f| !processed.contains(&f.dedupe_key()))
                .collect();
            if pending.is_empty() {
                break;
            }
            iterations_used = iteration + 1;

            // Severity first, then the fixed type order: add, modify,
            // add_dependency, reorder, remove.
            pending.sort_by_key(|f| {
                let type_rank = f
                    .suggested_revision
                    .as_ref()
                    .map(|r| r.revision_type.order())
                    .unwrap_or(u8::MAX);
                (f.severity.rank(), type_rank, f.rule_id.clone())
            });

            let mut applied_this_iteration = 0usize;
            for finding in pending {
                if applied.len() >= self.config.max_revisions_per_plan {
                    break;
                }
                let revision = finding
                    .suggested_revision
                    .clone()
                    .expect("filtered to findings with revisions");
                processed.insert(finding.dedupe_key());

                if let Some(conflict) = check_conflicts(&current, &revision) {
                    skipped.push((revision, conflict));
                    continue;
                }
                match apply_revision(&mut current, &revision) {
                    Ok(()) => {
                        let record = AppliedRevision {
                            revision,
                            rule_id: finding.rule_id.clone(),
                            confidence: finding.confidence,
                            applied_at: chrono::Utc::now(),
                            extra: Default::default(),
                        };
                        current.revision_history.push(record.clone());
                        applied.push(record);
                        applied_this_iteration += 1;
                    }
                    Err(error) => skipped.push((revision, error)),
                }
            }

            // Post-pass hygiene: orphan dependency references go away and
            // the priority tally is refreshed.
            current.resolve_dependencies();
            recount_priorities(&mut current);

            if applied_this_iteration == 0 {
                break;
            }
        }

        RevisedPlan {
            original_plan: plan.clone(),
            revised_plan: current,
            revisions_applied: applied,
            revisions_skipped: skipped,
            iterations_used,
            total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Reject revisions that would corrupt the plan. Returns the reason.
fn check_conflicts(plan: &ImplementationPlan, revision: &PlanRevision) -> Option<String> {
    let existing = plan.task_ids();
    match revision.revision_type {
        RevisionType::AddTask => {
            let new_task = revision.new_task.as_ref()?;
            if existing.contains(new_task.id.as_str()) {
                return Some(format!("task id '{}' already exists", new_task.id));
            }
            None
        }
        RevisionType::ModifyTask | RevisionType::ReorderTasks => {
            let target = revision.target_task_id.as_deref().unwrap_or("");
            if !existing.contains(target) {
                return Some(format!("target task '{}' does not exist", target));
            }
            None
        }
        RevisionType::RemoveTask => {
            let target = revision.target_task_id.as_deref().unwrap_or("");
            if !existing.contains(target) {
                return Some(format!("target task '{}' does not exist", target));
            }
            let dependents: Vec<&str> = plan
                .tasks
                .iter()
                .filter(|t| t.dependencies.iter().any(|d| d == target))
                .map(|t| t.id.as_str())
                .collect();
            if !dependents.is_empty() {
                return Some(format!(
                    "task '{}' has dependents: {}",
                    target,
                    dependents.join(", ")
                ));
            }
            None
        }
        RevisionType::AddDependency => {
            for (from, to) in &revision.dependency_additions {
                if from == to {
                    return Some(format!("self-dependency not allowed: {}", from));
                }
                if !existing.contains(from.as_str()) {
                    return Some(format!("source task '{}' does not exist", from));
                }
                if !existing.contains(to.as_str()) {
                    return Some(format!("target task '{}' does not exist", to));
                }
                if would_create_cycle(plan, from, to) {
                    return Some(format!("would create circular dependency: {} -> {}", from, to));
                }
            }
            None
        }
    }
}

/// DFS from `to` through dependency edges: if `from` is reachable, adding
/// `from -> to` closes a cycle.
fn would_create_cycle(plan: &ImplementationPlan, from: &str, to: &str) -> bool {
    let mut graph: HashMap<&str, &[String]> = HashMap::new();
    for task in &plan.tasks {
        graph.insert(task.id.as_str(), &task.dependencies);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![to];
    while let Some(current) = stack.pop() {
        if current == from {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(deps) = graph.get(current) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    false
}

fn apply_revision(plan: &mut ImplementationPlan, revision: &PlanRevision) -> Result<(), String> {
    match revision.revision_type {
        RevisionType::AddTask => {
            let new_task = revision
                .new_task
                .clone()
                .ok_or_else(|| "add_task revision missing new_task".to_string())?;
            plan.tasks.push(new_task);
            Ok(())
        }
        RevisionType::ModifyTask => {
            let target = revision
                .target_task_id
                .as_deref()
                .ok_or_else(|| "modify_task revision missing target_task_id".to_string())?;
            let task = plan
                .task_mut(target)
                .ok_or_else(|| format!("target task '{}' vanished", target))?;
            apply_modifications(task, &revision.modifications);
            Ok(())
        }
        RevisionType::RemoveTask => {
            let target = revision
                .target_task_id
                .as_deref()
                .ok_or_else(|| "remove_task revision missing target_task_id".to_string())?;
            let before = plan.tasks.len();
            plan.tasks.retain(|t| t.id != target);
            if plan.tasks.len() == before {
                return Err(format!("target task '{}' vanished", target));
            }
            Ok(())
        }
        RevisionType::AddDependency => {
            for (from, to) in &revision.dependency_additions {
                if let Some(task) = plan.task_mut(from) {
                    if !task.dependencies.contains(to) {
                        task.dependencies.push(to.clone());
                    }
                }
            }
            Ok(())
        }
        RevisionType::ReorderTasks => {
            let target = revision
                .target_task_id
                .as_deref()
                .ok_or_else(|| "reorder_tasks revision missing target_task_id".to_string())?;
            let priority = revision
                .modifications
                .get("priority")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| "reorder_tasks revision missing priority".to_string())?;
            let task = plan
                .task_mut(target)
                .ok_or_else(|| format!("target task '{}' vanished", target))?;
            task.priority = priority as u32;
            Ok(())
        }
    }
}

/// Field-wise modification application; unknown fields are ignored so
/// forward-compatible revisions degrade gracefully.
fn apply_modifications(task: &mut Task, modifications: &serde_json::Map<String, serde_json::Value>) {
    for (field, value) in modifications {
        match field.as_str() {
            "title" => {
                if let Some(s) = value.as_str() {
                    task.title = s.to_string();
                }
            }
            "description" => {
                if let Some(s) = value.as_str() {
                    task.description = s.to_string();
                }
            }
            "scope" => {
                if let Some(s) = value.as_str() {
                    task.scope = s.to_string();
                }
            }
            "priority" => {
                if let Some(n) = value.as_u64() {
                    task.priority = n as u32;
                }
            }
            "effort" => task.effort = value.as_str().map(str::to_string),
            "impact" => task.impact = value.as_str().map(str::to_string),
            "tags" => {
                if let Ok(tags) = serde_json::from_value(value.clone()) {
                    task.tags = tags;
                }
            }
            "acceptance_criteria" => {
                if let Ok(criteria) = serde_json::from_value(value.clone()) {
                    task.acceptance_criteria = criteria;
                }
            }
            "dependencies" => {
                if let Ok(dependencies) = serde_json::from_value(value.clone()) {
                    task.dependencies = dependencies;
                }
            }
            "file_paths" => {
                if let Ok(paths) = serde_json::from_value(value.clone()) {
                    task.file_paths = paths;
                }
            }
            _ => {}
        }
    }
}

/// Refresh the per-priority tally kept alongside the plan.
fn recount_priorities(plan: &mut ImplementationPlan) {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for task in &plan.tasks {
        *counts.entry(task.priority).or_insert(0) += 1;
    }
    let mut as_json = serde_json::Map::new();
    for (priority, count) in counts {
        as_json.insert(priority.to_string(), count.into());
    }
    plan.extra
        .insert("priority_counts".into(), serde_json::Value::Object(as_json));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::plan::engine::GuardrailEngine;
    use crate::plan::rules::PlanContext;

    fn task(id: &str, title: &str, deps: &[&str]) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn plan(tasks: Vec<Task>) -> ImplementationPlan {
        ImplementationPlan {
            tasks,
            ..Default::default()
        }
    }

    fn add_dependency_finding(from: &str, to: &str) -> PlanValidationFinding {
        PlanValidationFinding {
            rule_id: "TEST.DEP".into(),
            severity: Severity::Medium,
            summary: format!("link {} to {}", from, to),
            affected_tasks: vec![from.to_string()],
            suggestion: None,
            can_auto_revise: true,
            confidence: 0.9,
            suggested_revision: Some(PlanRevision {
                revision_type: RevisionType::AddDependency,
                rationale: "test".into(),
                target_task_id: None,
                new_task: None,
                modifications: Default::default(),
                dependency_additions: vec![(from.to_string(), to.to_string())],
            }),
        }
    }

    #[tokio::test]
    async fn test_add_test_task_then_revalidation_is_clean() {
        // Scenario: one feature task, coverage rule fires, auto-revision
        // adds the dependent test task, second validation is clean.
        let engine = GuardrailEngine::with_default_catalog(PlanGuardrailConfig::default());
        let original = plan(vec![task("TASK-001", "Implement user authentication", &[])]);
        let ctx = PlanContext::new(original.clone(), PlanGuardrailConfig::default());

        let result = engine.validate(&ctx).await;
        let coverage: Vec<&PlanValidationFinding> = result
            .findings
            .iter()
            .filter(|f| f.rule_id == "PLAN.TEST_COVERAGE")
            .collect();
        assert_eq!(coverage.len(), 1);

        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &result.findings);
        assert!(revised.was_revised());
        let added = revised
            .revised_plan
            .task("TASK-TST-001")
            .expect("test task added");
        assert_eq!(added.dependencies, vec!["TASK-001".to_string()]);
        assert!(added.has_tag("testing"));
        assert_eq!(revised.revised_plan.revision_history.len(), revised.revisions_applied.len());

        let ctx2 = PlanContext::new(revised.revised_plan.clone(), PlanGuardrailConfig::default());
        let second = engine.validate(&ctx2).await;
        assert!(
            !second.findings.iter().any(|f| f.rule_id == "PLAN.TEST_COVERAGE"),
            "coverage rule must be satisfied after revision"
        );
    }

    #[test]
    fn test_cycle_rejected_and_recorded() {
        // A depends on B, B depends on C; adding C -> A closes the loop.
        let original = plan(vec![
            task("A", "task a", &["B"]),
            task("B", "task b", &["C"]),
            task("C", "task c", &[]),
        ]);
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[add_dependency_finding("C", "A")]);

        assert!(revised.revisions_applied.is_empty());
        assert_eq!(revised.revisions_skipped.len(), 1);
        assert!(revised.revisions_skipped[0]
            .1
            .contains("would create circular dependency"));
        // the plan's edges are untouched
        assert_eq!(revised.revised_plan.task("A").unwrap().dependencies, vec!["B"]);
        assert_eq!(revised.revised_plan.task("B").unwrap().dependencies, vec!["C"]);
        assert!(revised.revised_plan.task("C").unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let original = plan(vec![task("A", "task a", &[])]);
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[add_dependency_finding("A", "A")]);
        assert_eq!(revised.revisions_skipped.len(), 1);
        assert!(revised.revisions_skipped[0].1.contains("self-dependency"));
    }

    #[test]
    fn test_duplicate_add_task_rejected() {
        let original = plan(vec![task("A", "Implement widget", &[])]);
        let finding = PlanValidationFinding {
            rule_id: "TEST.ADD".into(),
            severity: Severity::High,
            summary: "add duplicate".into(),
            affected_tasks: vec!["A".into()],
            suggestion: None,
            can_auto_revise: true,
            confidence: 0.9,
            suggested_revision: Some(PlanRevision {
                revision_type: RevisionType::AddTask,
                rationale: "test".into(),
                target_task_id: None,
                new_task: Some(task("A", "duplicate id", &[])),
                modifications: Default::default(),
                dependency_additions: vec![],
            }),
        };
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[finding]);
        assert!(revised.revisions_applied.is_empty());
        assert!(revised.revisions_skipped[0].1.contains("already exists"));
    }

    #[test]
    fn test_remove_task_with_dependents_rejected() {
        let original = plan(vec![task("A", "base", &[]), task("B", "needs a", &["A"])]);
        let finding = PlanValidationFinding {
            rule_id: "TEST.REMOVE".into(),
            severity: Severity::High,
            summary: "remove A".into(),
            affected_tasks: vec!["A".into()],
            suggestion: None,
            can_auto_revise: true,
            confidence: 0.9,
            suggested_revision: Some(PlanRevision {
                revision_type: RevisionType::RemoveTask,
                rationale: "test".into(),
                target_task_id: Some("A".into()),
                new_task: None,
                modifications: Default::default(),
                dependency_additions: vec![],
            }),
        };
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[finding]);
        assert!(revised.revisions_applied.is_empty());
        assert!(revised.revisions_skipped[0].1.contains("dependents"));
        assert!(revised.revised_plan.task("A").is_some());
    }

    #[test]
    fn test_low_confidence_finding_not_applied() {
        let original = plan(vec![task("A", "task", &[]), task("B", "other", &[])]);
        let mut finding = add_dependency_finding("A", "B");
        finding.confidence = 0.5;
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[finding]);
        assert!(!revised.was_revised());
        assert!(revised.revisions_skipped.is_empty()); // filtered, not skipped
    }

    #[test]
    fn test_max_revisions_cap() {
        let original = plan(vec![
            task("A", "a", &[]),
            task("B", "b", &[]),
            task("C", "c", &[]),
        ]);
        let findings = vec![
            add_dependency_finding("A", "B"),
            add_dependency_finding("B", "C"),
            add_dependency_finding("A", "C"),
        ];
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig {
            max_revisions_per_plan: 2,
            ..Default::default()
        });
        let revised = reviser.revise_plan(&original, &findings);
        assert_eq!(revised.revisions_applied.len(), 2);
    }

    #[test]
    fn test_audit_trail_renders() {
        let original = plan(vec![task("A", "a", &[]), task("B", "b", &[])]);
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[add_dependency_finding("A", "B")]);
        let trail = revised.format_audit_trail();
        assert!(trail.contains("TEST.DEP"));
        assert!(trail.contains("A → B"));
        assert!(trail.contains("Applied 1 revision(s)"));
    }

    #[test]
    fn test_priority_recount_in_extra() {
        let original = plan(vec![task("A", "a", &[]), task("B", "b", &[])]);
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[add_dependency_finding("A", "B")]);
        let counts = revised.revised_plan.extra.get("priority_counts").unwrap();
        assert_eq!(counts["0"], 2);
    }

    #[test]
    fn test_serde_round_trip_of_revised_plan() {
        let original = plan(vec![task("A", "a", &[]), task("B", "b", &[])]);
        let reviser = AutoRevisionEngine::new(PlanGuardrailConfig::default());
        let revised = reviser.revise_plan(&original, &[add_dependency_finding("A", "B")]);

        let json = serde_json::to_string(&revised.revised_plan).unwrap();
        let back: ImplementationPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tasks.len(), revised.revised_plan.tasks.len());
        assert_eq!(
            back.revision_history.len(),
            revised.revised_plan.revision_history.len()
        );
    }
}
