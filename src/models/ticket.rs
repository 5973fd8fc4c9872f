//! Normalised view of tickets coming from external issue trackers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Github,
    Linear,
    Jira,
}

impl TicketSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Linear => "linear",
            Self::Jira => "jira",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Done,
    Cancelled,
}

impl TicketStatus {
    /// Normalise tracker-specific state strings.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "open" | "todo" | "backlog" | "triage" => Self::Open,
            "in_progress" | "in progress" | "started" | "doing" => Self::InProgress,
            "done" | "closed" | "completed" | "merged" => Self::Done,
            "cancelled" | "canceled" | "wontfix" | "duplicate" => Self::Cancelled,
            _ => Self::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    None,
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    /// Infer priority from free-form labels when the tracker has no
    /// first-class priority field.
    pub fn from_labels(labels: &[String]) -> Self {
        for label in labels {
            let l = label.to_ascii_lowercase();
            if l.contains("urgent") || l.contains("p0") || l.contains("critical") {
                return Self::Urgent;
            }
            if l.contains("high") || l.contains("p1") {
                return Self::High;
            }
            if l.contains("medium") || l.contains("p2") {
                return Self::Medium;
            }
            if l.contains("low") || l.contains("p3") {
                return Self::Low;
            }
        }
        Self::None
    }
}

/// One ticket, normalised across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEntity {
    pub id: String,
    pub source: TicketSource,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    pub priority: TicketPriority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub linked_prs: Vec<String>,
    /// Monotonic version used in the cache key so stale entries are
    /// distinguishable from current ones.
    #[serde(default)]
    pub version: u64,
}

impl TicketEntity {
    /// Content rendering used if a ticket is ever embedded alongside code.
    #[allow(dead_code)]
    pub fn to_vector_content(&self) -> String {
        let mut out = format!("{}: {}\n{}", self.id, self.title, self.description);
        if !self.labels.is_empty() {
            out.push_str("\nlabels: ");
            out.push_str(&self.labels.join(", "));
        }
        for criterion in &self.acceptance_criteria {
            out.push_str("\n- ");
            out.push_str(criterion);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_normalize() {
        assert_eq!(TicketStatus::normalize("Backlog"), TicketStatus::Open);
        assert_eq!(TicketStatus::normalize("In Progress"), TicketStatus::InProgress);
        assert_eq!(TicketStatus::normalize("merged"), TicketStatus::Done);
        assert_eq!(TicketStatus::normalize("wontfix"), TicketStatus::Cancelled);
        assert_eq!(TicketStatus::normalize("???"), TicketStatus::Open);
    }

    #[test]
    fn test_priority_from_labels() {
        assert_eq!(
            TicketPriority::from_labels(&["bug".into(), "P0".into()]),
            TicketPriority::Urgent
        );
        assert_eq!(
            TicketPriority::from_labels(&["prio:high".into()]),
            TicketPriority::High
        );
        assert_eq!(TicketPriority::from_labels(&[]), TicketPriority::None);
    }
}
