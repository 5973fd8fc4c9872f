//! Guardrail engine — runs the rule catalog over a plan, sequentially or
//! on a bounded worker pool, each rule under a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;

use super::config::PlanGuardrailConfig;
use super::rules::{default_catalog, GuardrailRule, PlanContext};
use crate::models::{PlanValidationFinding, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct RuleTiming {
    pub rule_id: String,
    pub execution_time_ms: f64,
}

/// Aggregated result of one validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanGuardrailResult {
    pub findings: Vec<PlanValidationFinding>,
    pub rules_executed: usize,
    pub rules_skipped: usize,
    pub execution_time_ms: f64,
    pub timings: Vec<RuleTiming>,
    /// `(rule_id, error)` pairs from rules that failed or timed out.
    pub errors: Vec<(String, String)>,
}

impl PlanGuardrailResult {
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    /// High or critical findings block a plan.
    pub fn has_blocking_findings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| matches!(f.severity, Severity::High | Severity::Critical))
    }
}

pub struct GuardrailEngine {
    rules: Vec<Arc<dyn GuardrailRule>>,
    config: PlanGuardrailConfig,
}

impl GuardrailEngine {
    pub fn new(config: PlanGuardrailConfig) -> Self {
        Self {
            rules: Vec::new(),
            config,
        }
    }

    /// Engine loaded with the built-in five-rule catalog.
    pub fn with_default_catalog(config: PlanGuardrailConfig) -> Self {
        let mut engine = Self::new(config);
        for rule in default_catalog() {
            engine.register(rule).expect("catalog ids are unique");
        }
        engine
    }

    pub fn register(&mut self, rule: Arc<dyn GuardrailRule>) -> Result<(), String> {
        if self.rules.iter().any(|r| r.rule_id() == rule.rule_id()) {
            return Err(format!("rule {} is already registered", rule.rule_id()));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Arc<dyn GuardrailRule>] {
        &self.rules
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Arc<dyn GuardrailRule>> {
        self.rules.iter().find(|r| r.rule_id() == rule_id)
    }

    pub fn config(&self) -> &PlanGuardrailConfig {
        &self.config
    }

    /// Run all enabled rules.
    pub async fn validate(&self, ctx: &PlanContext) -> PlanGuardrailResult {
        let rule_ids: Vec<&str> = self.rules.iter().map(|r| r.rule_id()).collect();
        self.validate_rules(ctx, &rule_ids).await
    }

    /// Fast mode: only rules that promise <100 ms and no memory search.
    pub async fn validate_fast(&self, ctx: &PlanContext) -> PlanGuardrailResult {
        let rule_ids: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.is_fast())
            .map(|r| r.rule_id())
            .collect();
        self.validate_rules(ctx, &rule_ids).await
    }

    pub async fn validate_rules(&self, ctx: &PlanContext, rule_ids: &[&str]) -> PlanGuardrailResult {
        let started = Instant::now();
        let mut result = PlanGuardrailResult::default();

        let to_run: Vec<Arc<dyn GuardrailRule>> = rule_ids
            .iter()
            .filter_map(|id| self.rule(id).cloned())
            .collect();

        let mut enabled = Vec::new();
        for rule in to_run {
            if self.config.is_rule_enabled(rule.rule_id()) {
                enabled.push(rule);
            } else {
                result.rules_skipped += 1;
            }
        }

        let outcomes = if self.config.parallel_execution {
            self.run_parallel(ctx, &enabled).await
        } else {
            let mut outcomes = Vec::with_capacity(enabled.len());
            for rule in &enabled {
                outcomes.push(self.run_one(ctx, rule.clone()).await);
                // Halting semantics: an error stops further rules when the
                // operator turned continue_on_error off.
                if !self.config.continue_on_error
                    && outcomes.last().is_some_and(|o| o.error.is_some())
                {
                    break;
                }
            }
            outcomes
        };

        for outcome in outcomes {
            result.rules_executed += 1;
            result.timings.push(RuleTiming {
                rule_id: outcome.rule_id.clone(),
                execution_time_ms: outcome.execution_time_ms,
            });
            match outcome.error {
                Some(error) => result.errors.push((outcome.rule_id, error)),
                None => {
                    let filtered = self.filter_findings(outcome.findings);
                    result.findings.extend(filtered);
                }
            }
        }

        result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }

    async fn run_parallel(
        &self,
        ctx: &PlanContext,
        rules: &[Arc<dyn GuardrailRule>],
    ) -> Vec<RuleOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_workers.max(1)));
        let mut handles = Vec::with_capacity(rules.len());
        for rule in rules {
            let permit_source = semaphore.clone();
            let rule = rule.clone();
            let ctx = ctx.clone();
            let timeout = Duration::from_millis(self.config.rule_timeout_ms);
            handles.push(tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await;
                execute_rule(rule, ctx, timeout).await
            }));
        }

        // Ordered join keeps the aggregate deterministic regardless of
        // completion order.
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(RuleOutcome {
                    rule_id: "<join>".into(),
                    findings: vec![],
                    execution_time_ms: 0.0,
                    error: Some(format!("rule task panicked: {}", e)),
                }),
            }
        }
        outcomes
    }

    async fn run_one(&self, ctx: &PlanContext, rule: Arc<dyn GuardrailRule>) -> RuleOutcome {
        execute_rule(
            rule,
            ctx.clone(),
            Duration::from_millis(self.config.rule_timeout_ms),
        )
        .await
    }

    fn filter_findings(&self, findings: Vec<PlanValidationFinding>) -> Vec<PlanValidationFinding> {
        findings
            .into_iter()
            .filter(|f| f.confidence >= self.config.revision_confidence_threshold)
            .take(self.config.max_findings_per_rule)
            .collect()
    }
}

struct RuleOutcome {
    rule_id: String,
    findings: Vec<PlanValidationFinding>,
    execution_time_ms: f64,
    error: Option<String>,
}

/// Run one rule on the blocking pool under its timeout. A panicking or
/// overrunning rule becomes an error entry, never a crash.
async fn execute_rule(
    rule: Arc<dyn GuardrailRule>,
    ctx: PlanContext,
    timeout: Duration,
) -> RuleOutcome {
    let rule_id = rule.rule_id().to_string();
    let started = Instant::now();

    let task = tokio::task::spawn_blocking(move || rule.validate(&ctx));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(findings)) => RuleOutcome {
            rule_id,
            findings,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: None,
        },
        Ok(Err(e)) => RuleOutcome {
            rule_id,
            findings: vec![],
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: Some(format!("rule panicked: {}", e)),
        },
        Err(_) => RuleOutcome {
            rule_id,
            findings: vec![],
            execution_time_ms: timeout.as_secs_f64() * 1000.0,
            error: Some(format!("rule exceeded {:?} timeout", timeout)),
        },
    }
}
