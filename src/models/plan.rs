//! Plan structures consumed by the guardrail engine: tasks, findings,
//! revisions and the audit trail.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Rank for processing order: higher severity first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One unit of work inside an implementation plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Logical area the task belongs to (backend, frontend, infra...).
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of tasks this task depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared file paths the task intends to touch.
    #[serde(default)]
    pub file_paths: Vec<String>,
}

impl Task {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A plan lives inside a single request; the revision history may be
/// serialised for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub revision_history: Vec<AppliedRevision>,
    /// Unknown fields survive a round trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImplementationPlan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task_ids(&self) -> std::collections::HashSet<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    /// Drop dependency references to tasks that no longer exist.
    pub fn resolve_dependencies(&mut self) -> usize {
        let ids: std::collections::HashSet<String> =
            self.tasks.iter().map(|t| t.id.clone()).collect();
        let mut dropped = 0;
        for task in &mut self.tasks {
            let before = task.dependencies.len();
            task.dependencies.retain(|d| ids.contains(d));
            dropped += before - task.dependencies.len();
        }
        dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionType {
    AddTask,
    ModifyTask,
    RemoveTask,
    AddDependency,
    ReorderTasks,
}

impl RevisionType {
    /// Fixed application order: create first, remove last.
    pub fn order(&self) -> u8 {
        match self {
            Self::AddTask => 0,
            Self::ModifyTask => 1,
            Self::AddDependency => 2,
            Self::ReorderTasks => 3,
            Self::RemoveTask => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddTask => "add_task",
            Self::ModifyTask => "modify_task",
            Self::RemoveTask => "remove_task",
            Self::AddDependency => "add_dependency",
            Self::ReorderTasks => "reorder_tasks",
        }
    }
}

/// A concrete change a rule suggests applying to the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRevision {
    pub revision_type: RevisionType,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_task: Option<Task>,
    /// Field changes for modify/reorder: field name → new JSON value.
    #[serde(default)]
    pub modifications: serde_json::Map<String, serde_json::Value>,
    /// `(from_task_id, to_task_id)` pairs: from depends on to.
    #[serde(default)]
    pub dependency_additions: Vec<(String, String)>,
}

/// A validation finding emitted by a guardrail rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanValidationFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub affected_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub can_auto_revise: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_revision: Option<PlanRevision>,
}

fn default_confidence() -> f64 {
    1.0
}

impl PlanValidationFinding {
    /// Identity used to avoid re-processing the same finding across
    /// revision iterations.
    pub fn dedupe_key(&self) -> String {
        let summary: String = self.summary.chars().take(50).collect();
        format!("{}:{}:{}", self.rule_id, self.affected_tasks.join(","), summary)
    }
}

/// Record of a successfully applied revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedRevision {
    pub revision: PlanRevision,
    pub rule_id: String,
    pub confidence: f64,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    /// Unknown fields survive a round trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of the auto-revision pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisedPlan {
    pub original_plan: ImplementationPlan,
    pub revised_plan: ImplementationPlan,
    pub revisions_applied: Vec<AppliedRevision>,
    /// `(revision, reason)` pairs rejected by conflict checks.
    pub revisions_skipped: Vec<(PlanRevision, String)>,
    pub iterations_used: u32,
    pub total_time_ms: f64,
}

impl RevisedPlan {
    #[allow(dead_code)]
    pub fn was_revised(&self) -> bool {
        !self.revisions_applied.is_empty()
    }

    /// Human-readable audit trail: rule, rationale, change, confidence.
    pub fn format_audit_trail(&self) -> String {
        let mut lines = vec!["## Plan Revisions Applied".to_string(), String::new()];

        if self.revisions_applied.is_empty() && self.revisions_skipped.is_empty() {
            lines.push("*No revisions were needed.*".to_string());
            return lines.join("\n");
        }

        for (i, applied) in self.revisions_applied.iter().enumerate() {
            let rev = &applied.revision;
            lines.push(format!("### {}. {}", i + 1, rev.revision_type.as_str()));
            lines.push(format!("- **Rule**: {}", applied.rule_id));
            lines.push(format!("- **Reason**: {}", rev.rationale));
            lines.push(format!("- **Confidence**: {:.0}%", applied.confidence * 100.0));
            match rev.revision_type {
                RevisionType::AddTask => {
                    if let Some(task) = &rev.new_task {
                        lines.push(format!("- **Added**: Task '{}' - {}", task.id, task.title));
                    }
                }
                RevisionType::ModifyTask | RevisionType::ReorderTasks => {
                    if let Some(id) = &rev.target_task_id {
                        lines.push(format!("- **Modified**: Task '{}'", id));
                    }
                    if !rev.modifications.is_empty() {
                        let keys: Vec<&str> = rev.modifications.keys().map(|k| k.as_str()).collect();
                        lines.push(format!("- **Changes**: {}", keys.join(", ")));
                    }
                }
                RevisionType::RemoveTask => {
                    if let Some(id) = &rev.target_task_id {
                        lines.push(format!("- **Removed**: Task '{}'", id));
                    }
                }
                RevisionType::AddDependency => {
                    for (from, to) in &rev.dependency_additions {
                        lines.push(format!("- **Dependency**: {} → {}", from, to));
                    }
                }
            }
            lines.push(String::new());
        }

        if !self.revisions_skipped.is_empty() {
            lines.push("### Skipped Revisions".to_string());
            lines.push(String::new());
            for (rev, reason) in &self.revisions_skipped {
                lines.push(format!("- {}: {}", rev.revision_type.as_str(), reason));
            }
            lines.push(String::new());
        }

        lines.push("---".to_string());
        lines.push(format!(
            "*Applied {} revision(s), skipped {}, in {} iteration(s) ({:.1}ms)*",
            self.revisions_applied.len(),
            self.revisions_skipped.len(),
            self.iterations_used,
            self.total_time_ms,
        ));
        lines.join("\n")
    }
}
