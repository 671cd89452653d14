//! Security incidents and access-monitor subject states

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::impl_domain_status_conversions;

/// Incident and threshold severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl_domain_status_conversions!(IncidentSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// Incident lifecycle. Transitions are operator-driven and strictly forward:
/// `Open -> Investigating -> Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
}

impl_domain_status_conversions!(IncidentStatus {
    Open => "open",
    Investigating => "investigating",
    Resolved => "resolved",
});

impl IncidentStatus {
    /// `true` only for the next forward step
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Investigating) | (Self::Investigating, Self::Resolved)
        )
    }
}

/// Who or what the access monitor tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MonitoredSubject {
    Actor(String),
    Resource(String),
}

impl fmt::Display for MonitoredSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor(id) => write!(f, "actor:{id}"),
            Self::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}

/// Per-subject monitor state: `Normal -> Flagged -> Normal | Escalated`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    #[default]
    Normal,
    Flagged,
    Escalated,
}

impl_domain_status_conversions!(SubjectState {
    Normal => "normal",
    Flagged => "flagged",
    Escalated => "escalated",
});

/// Operator decision on a flagged subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Clear,
    Escalate,
}

/// Persisted security incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIncident {
    /// UUID v7
    pub id: Uuid,
    /// e.g. `excessive_phi_access`
    pub incident_type: String,
    /// Severity of the tier that opened it
    pub severity: IncidentSeverity,
    /// Lifecycle position
    pub status: IncidentStatus,
    /// Actor or resource the incident is about
    pub subject: MonitoredSubject,
    /// Resources accessed in the window that triggered it
    pub affected_resources: Vec<String>,
    /// Human-readable summary of the breach
    pub description: String,
    /// When the incident was opened
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Set when the status becomes `Resolved`
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator note; required to resolve
    pub resolution: Option<String>,
}
