//! Rule contract and the built-in catalog.

mod architecture;
mod doc_coverage;
mod duplicate;
mod performance;
mod test_coverage;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::PlanGuardrailConfig;
use crate::models::{ImplementationPlan, PlanRevision, PlanValidationFinding, Severity};

pub use architecture::ArchitecturalConsistencyRule;
pub use doc_coverage::DocCoverageRule;
pub use duplicate::DuplicateDetectionRule;
pub use performance::PerformancePatternRule;
pub use test_coverage::TestCoverageRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Coverage,
    Consistency,
    Architecture,
    Performance,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coverage => "coverage",
            Self::Consistency => "consistency",
            Self::Architecture => "architecture",
            Self::Performance => "performance",
        }
    }
}

/// Semantic-memory lookup used by rules that compare tasks against the
/// indexed knowledge base. Synchronous by contract: rules stay
/// deterministic, the bridge to async retrieval lives with the caller.
pub trait MemorySearch: Send + Sync {
    /// Returns `(entity_name, similarity)` pairs, best first.
    fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)>;
}

/// Everything a rule sees during validation. Owned and cheap to clone so
/// rule execution can hop threads under a timeout.
#[derive(Clone)]
pub struct PlanContext {
    pub plan: Arc<ImplementationPlan>,
    pub config: Arc<PlanGuardrailConfig>,
    pub memory: Option<Arc<dyn MemorySearch>>,
}

impl PlanContext {
    pub fn new(plan: ImplementationPlan, config: PlanGuardrailConfig) -> Self {
        Self {
            plan: Arc::new(plan),
            config: Arc::new(config),
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemorySearch>) -> Self {
        self.memory = Some(memory);
        self
    }
}

/// A deterministic validator over a plan.
pub trait GuardrailRule: Send + Sync {
    fn rule_id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn category(&self) -> RuleCategory;
    fn default_severity(&self) -> Severity;
    /// True when the rule finishes within ~100 ms and never touches
    /// memory search — the fast-mode subset.
    fn is_fast(&self) -> bool;

    fn validate(&self, ctx: &PlanContext) -> Vec<PlanValidationFinding>;

    fn suggest_revision(
        &self,
        finding: &PlanValidationFinding,
        ctx: &PlanContext,
    ) -> Option<PlanRevision>;

    fn severity(&self, ctx: &PlanContext) -> Severity {
        ctx.config.severity_for(self.rule_id(), self.default_severity())
    }
}

/// The built-in five-rule catalog.
pub fn default_catalog() -> Vec<Arc<dyn GuardrailRule>> {
    vec![
        Arc::new(TestCoverageRule),
        Arc::new(DocCoverageRule),
        Arc::new(DuplicateDetectionRule),
        Arc::new(ArchitecturalConsistencyRule),
        Arc::new(PerformancePatternRule),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::Task;

    pub fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn context(tasks: Vec<Task>) -> PlanContext {
        PlanContext::new(
            ImplementationPlan {
                tasks,
                ..Default::default()
            },
            PlanGuardrailConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_five_rules_with_unique_ids() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 5);
        let mut ids: Vec<&str> = catalog.iter().map(|r| r.rule_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_fast_rules_subset() {
        let catalog = default_catalog();
        let fast: Vec<&str> = catalog
            .iter()
            .filter(|r| r.is_fast())
            .map(|r| r.rule_id())
            .collect();
        // duplicate detection needs memory search and must not be fast
        assert!(!fast.contains(&"PLAN.DUPLICATE_DETECTION"));
        assert!(fast.contains(&"PLAN.TEST_COVERAGE"));
    }

    #[test]
    fn test_catalog_covers_all_categories() {
        let catalog = default_catalog();
        for category in [
            RuleCategory::Coverage,
            RuleCategory::Consistency,
            RuleCategory::Architecture,
            RuleCategory::Performance,
        ] {
            assert!(
                catalog.iter().any(|r| r.category() == category),
                "no rule in category {:?}",
                category
            );
        }
    }
}
