//! Guardrail configuration — which rules run, how they are tuned, and the
//! auto-revision safety limits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanGuardrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether findings may be applied mechanically.
    #[serde(default = "default_true")]
    pub auto_revise: bool,
    /// Minimum confidence for a finding to be auto-applied.
    #[serde(default = "default_confidence_threshold")]
    pub revision_confidence_threshold: f64,
    #[serde(default = "default_max_revisions")]
    pub max_revisions_per_plan: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-rule execution budget.
    #[serde(default = "default_rule_timeout_ms")]
    pub rule_timeout_ms: u64,
    /// A failing rule is skipped rather than halting validation.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_max_findings")]
    pub max_findings_per_rule: usize,
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    /// Per-rule severity/threshold overrides keyed by rule id.
    #[serde(default)]
    pub rule_overrides: HashMap<String, RuleOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

fn default_true() -> bool {
    true
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_max_revisions() -> usize {
    10
}
fn default_max_iterations() -> u32 {
    3
}
fn default_rule_timeout_ms() -> u64 {
    1000
}
fn default_parallel_workers() -> usize {
    4
}
fn default_max_findings() -> usize {
    10
}

impl Default for PlanGuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_revise: true,
            revision_confidence_threshold: default_confidence_threshold(),
            max_revisions_per_plan: default_max_revisions(),
            max_iterations: default_max_iterations(),
            rule_timeout_ms: default_rule_timeout_ms(),
            continue_on_error: true,
            parallel_execution: false,
            parallel_workers: default_parallel_workers(),
            max_findings_per_rule: default_max_findings(),
            disabled_rules: Vec::new(),
            rule_overrides: HashMap::new(),
        }
    }
}

impl PlanGuardrailConfig {
    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        self.enabled && !self.disabled_rules.iter().any(|r| r == rule_id)
    }

    pub fn should_auto_revise(&self, confidence: f64) -> bool {
        self.auto_revise && confidence >= self.revision_confidence_threshold
    }

    pub fn severity_for(&self, rule_id: &str, default: Severity) -> Severity {
        self.rule_overrides
            .get(rule_id)
            .and_then(|o| o.severity)
            .unwrap_or(default)
    }

    pub fn threshold_for(&self, rule_id: &str, default: f64) -> f64 {
        self.rule_overrides
            .get(rule_id)
            .and_then(|o| o.threshold)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlanGuardrailConfig::default();
        assert!(config.enabled);
        assert!(config.auto_revise);
        assert!((config.revision_confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_revisions_per_plan, 10);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.rule_timeout_ms, 1000);
        assert!(config.continue_on_error);
        assert_eq!(config.parallel_workers, 4);
    }

    #[test]
    fn test_disabled_rules() {
        let config = PlanGuardrailConfig {
            disabled_rules: vec!["PLAN.DOC_COVERAGE".into()],
            ..Default::default()
        };
        assert!(!config.is_rule_enabled("PLAN.DOC_COVERAGE"));
        assert!(config.is_rule_enabled("PLAN.TEST_COVERAGE"));
    }

    #[test]
    fn test_should_auto_revise_threshold() {
        let config = PlanGuardrailConfig::default();
        assert!(config.should_auto_revise(0.7));
        assert!(config.should_auto_revise(0.95));
        assert!(!config.should_auto_revise(0.69));
    }

    #[test]
    fn test_overrides() {
        let mut config = PlanGuardrailConfig::default();
        config.rule_overrides.insert(
            "PLAN.DUPLICATE_DETECTION".into(),
            RuleOverride {
                severity: Some(Severity::High),
                threshold: Some(0.85),
            },
        );
        assert_eq!(
            config.severity_for("PLAN.DUPLICATE_DETECTION", Severity::Medium),
            Severity::High
        );
        assert!((config.threshold_for("PLAN.DUPLICATE_DETECTION", 0.70) - 0.85).abs() < f64::EPSILON);
        assert!((config.threshold_for("PLAN.OTHER", 0.70) - 0.70).abs() < f64::EPSILON);
    }
}
