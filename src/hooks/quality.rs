//! Fast quality-rule catalog shared by the pre- and post-tool hooks.
//! Every rule is regex-based, deterministic and network-free.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::models::Severity;

#[derive(Debug, Clone, Serialize)]
pub struct QualityFinding {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
}

impl QualityFinding {
    pub fn is_blocking(&self) -> bool {
        matches!(self.severity, Severity::Critical)
    }
}

fn swallowed_exception_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // bare `except:`/`except Exception:` followed by pass, and empty JS catch
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*except(?:\s+Exception)?\s*:\s*(?:#.*)?\n\s*pass\b|catch\s*\([^)]*\)\s*\{\s*\}")
            .unwrap()
    })
}

fn force_push_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"git\s+push\s+(?:[^\n]*\s)?(?:--force\b|-f\b)(?:[^\n]*\s(?:main|master|origin/main|origin/master))?")
            .unwrap()
    })
}

fn network_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"requests\.(?:get|post|put|delete)\(|fetch\(|axios\.(?:get|post|put|delete)\(")
            .unwrap()
    })
}

fn retry_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)retry|backoff|tenacity|max_attempts|attempts\s*=").unwrap())
}

fn line_of(content: &str, byte_offset: usize) -> usize {
    content[..byte_offset.min(content.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

/// Run the catalog against a proposed or written file. Budgeted by the
/// caller; everything here is linear scans.
pub fn run_fast_rules(path: &str, content: &str) -> Vec<QualityFinding> {
    let mut findings = Vec::new();

    for m in swallowed_exception_re().find_iter(content) {
        findings.push(QualityFinding {
            rule_id: "QUALITY.SWALLOWED_EXCEPTION",
            severity: Severity::Medium,
            message: format!(
                "{}:{} swallows an exception; log or re-raise it",
                path,
                line_of(content, m.start())
            ),
            line: line_of(content, m.start()),
        });
    }

    for m in force_push_re().find_iter(content) {
        let matched = m.as_str();
        let to_protected = matched.contains("main") || matched.contains("master");
        findings.push(QualityFinding {
            rule_id: "QUALITY.FORCE_PUSH",
            severity: if to_protected {
                Severity::Critical
            } else {
                Severity::High
            },
            message: format!(
                "{}:{} force push{}; use --force-with-lease or drop it",
                path,
                line_of(content, m.start()),
                if to_protected { " to a protected branch" } else { "" }
            ),
            line: line_of(content, m.start()),
        });
    }

    // Missing retry: flag network call sites in files with no retry
    // machinery anywhere. Low severity — this is advice, not a gate.
    if network_call_re().is_match(content) && !retry_hint_re().is_match(content) {
        let first = network_call_re().find(content).map(|m| m.start()).unwrap_or(0);
        findings.push(QualityFinding {
            rule_id: "QUALITY.MISSING_RETRY",
            severity: Severity::Low,
            message: format!(
                "{}:{} network call without visible retry/backoff handling",
                path,
                line_of(content, first)
            ),
            line: line_of(content, first),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swallowed_exception_python() {
        let content = "try:\n    work()\nexcept:\n    pass\n";
        let findings = run_fast_rules("a.py", content);
        assert!(findings
            .iter()
            .any(|f| f.rule_id == "QUALITY.SWALLOWED_EXCEPTION"));
    }

    #[test]
    fn test_swallowed_exception_empty_js_catch() {
        let content = "try { work(); } catch (e) {}\n";
        let findings = run_fast_rules("a.ts", content);
        assert!(findings
            .iter()
            .any(|f| f.rule_id == "QUALITY.SWALLOWED_EXCEPTION"));
    }

    #[test]
    fn test_handled_exception_passes() {
        let content = "try:\n    work()\nexcept ValueError as e:\n    log.error(e)\n";
        let findings = run_fast_rules("a.py", content);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_force_push_to_main_is_blocking() {
        let content = "git push --force origin main\n";
        let findings = run_fast_rules("deploy.sh", content);
        let force = findings
            .iter()
            .find(|f| f.rule_id == "QUALITY.FORCE_PUSH")
            .unwrap();
        assert!(force.is_blocking());
    }

    #[test]
    fn test_force_push_elsewhere_warns() {
        let content = "git push -f origin feature-branch\n";
        let findings = run_fast_rules("deploy.sh", content);
        let force = findings
            .iter()
            .find(|f| f.rule_id == "QUALITY.FORCE_PUSH")
            .unwrap();
        assert!(!force.is_blocking());
    }

    #[test]
    fn test_missing_retry_flagged() {
        let content = "resp = requests.get(url)\n";
        let findings = run_fast_rules("client.py", content);
        assert!(findings.iter().any(|f| f.rule_id == "QUALITY.MISSING_RETRY"));
    }

    #[test]
    fn test_retry_present_passes() {
        let content = "for attempt in retry(max_attempts=3):\n    resp = requests.get(url)\n";
        let findings = run_fast_rules("client.py", content);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_line_numbers() {
        let content = "ok()\nok()\ntry:\n    x()\nexcept:\n    pass\n";
        let findings = run_fast_rules("a.py", content);
        assert_eq!(findings[0].line, 5);
    }
}
