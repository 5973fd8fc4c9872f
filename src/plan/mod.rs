//! Plan-mode guardrails — a deterministic rule engine that validates
//! implementation plans and mechanically revises them within safety limits.

pub mod config;
pub mod engine;
pub mod revision;
pub mod rules;

pub use config::{PlanGuardrailConfig, RuleOverride};
pub use engine::{GuardrailEngine, PlanGuardrailResult};
pub use revision::AutoRevisionEngine;
pub use rules::{GuardrailRule, MemorySearch, PlanContext, RuleCategory};
