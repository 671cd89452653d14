//! PHI access audit types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::incident::{IncidentSeverity, MonitoredSubject, SecurityIncident};
use crate::errors::{PhiVaultError, Result};
use crate::impl_domain_status_conversions;

/// Kind of access to protected data
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    View,
    Modify,
    Export,
    Delete,
}

impl_domain_status_conversions!(AuditAction {
    View => "view",
    Modify => "modify",
    Export => "export",
    Delete => "delete",
});

/// Immutable record of one access to protected data.
///
/// Never contains field values, only field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// UUID v7, so ids sort by creation time
    pub id: Uuid,
    /// User or service that accessed the record
    pub actor_id: String,
    /// Kind of record, e.g. `patient`
    pub resource_type: String,
    /// Record identifier
    pub resource_id: String,
    /// What was done
    pub action: AuditAction,
    /// Names of the protected fields touched, never their values
    pub accessed_fields: Vec<String>,
    /// Client address as reported by the API layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Caller session identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Correlation id of the originating request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Stated purpose of the access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Territory the access is scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub territory_id: Option<String>,
    /// When the access was logged
    pub created_at: DateTime<Utc>,
}

/// Request metadata supplied by the calling API layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Client address
    pub ip_address: Option<String>,
    /// Caller session identifier
    pub session_id: Option<String>,
    /// Correlation id
    pub request_id: Option<String>,
    /// Stated purpose of the access
    pub reason: Option<String>,
    /// Territory the access is scoped to, for per-territory reports
    pub territory_id: Option<String>,
}

impl RequestContext {
    /// Context with every field unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client address
    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Set the session identifier
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the stated purpose
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Scope the access to a territory
    #[must_use]
    pub fn with_territory(mut self, territory_id: impl Into<String>) -> Self {
        self.territory_id = Some(territory_id.into());
        self
    }
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Inclusive
    pub start: DateTime<Utc>,
    /// Exclusive
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Fails when `end` precedes `start`. An empty range is allowed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(PhiVaultError::InvalidInput(
                "date range end precedes start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// `true` for `start <= at < end`
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Conjunctive filter over audit entries. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Only this actor
    pub actor_id: Option<String>,
    /// Only this resource
    pub resource_id: Option<String>,
    /// Only this resource type
    pub resource_type: Option<String>,
    /// Only this action
    pub action: Option<AuditAction>,
    /// Only this territory
    pub territory_id: Option<String>,
    /// Only entries created inside this range
    pub date_range: Option<DateRange>,
}

impl AuditFilter {
    /// Filter matching every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Match only `actor_id`
    #[must_use]
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Match only `resource_id`
    #[must_use]
    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Match only `resource_type`
    #[must_use]
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Match only `action`
    #[must_use]
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Match only `territory_id`
    #[must_use]
    pub fn territory(mut self, territory_id: impl Into<String>) -> Self {
        self.territory_id = Some(territory_id.into());
        self
    }

    /// Restrict to entries created inside `range`
    #[must_use]
    pub fn within(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// `true` when `entry` satisfies every set criterion
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.as_deref().map_or(true, |a| entry.actor_id == a)
            && self.resource_id.as_deref().map_or(true, |r| entry.resource_id == r)
            && self.resource_type.as_deref().map_or(true, |t| entry.resource_type == t)
            && self.action.map_or(true, |a| entry.action == a)
            && self
                .territory_id
                .as_deref()
                .map_or(true, |t| entry.territory_id.as_deref() == Some(t))
            && self.date_range.map_or(true, |r| r.contains(entry.created_at))
    }
}

/// Offset/limit page over append order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Entries to skip
    pub offset: usize,
    /// Maximum entries to return
    pub limit: usize,
}

impl PageRequest {
    /// First page of `limit` entries
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// The page after this one
    #[must_use]
    pub fn next(self) -> Self {
        Self { offset: self.offset + self.limit, limit: self.limit }
    }
}

/// Anomalous access volume attributed to one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPattern {
    /// Actor or resource the accesses are attributed to
    pub subject: MonitoredSubject,
    /// Most severe breached tier
    pub severity: IncidentSeverity,
    /// Accesses in the busiest window
    pub access_count: usize,
    /// Window length of the breached tier
    pub window_minutes: i64,
    /// First access in the busiest window
    pub first_seen: DateTime<Utc>,
    /// Last access in the busiest window
    pub last_seen: DateTime<Utc>,
}

/// Compliance summary for one reporting period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Half-open reporting period
    pub period: DateRange,
    /// Territory the report was restricted to, if any
    pub territory_id: Option<String>,
    /// Entries in the period
    pub total_events: u64,
    /// Entry counts per action
    pub by_action: BTreeMap<AuditAction, u64>,
    /// Entry counts per resource type
    pub by_resource_type: BTreeMap<String, u64>,
    /// Distinct actors in the period
    pub unique_actors: usize,
    /// Anomalies detected over the period, most severe first
    pub access_patterns: Vec<AccessPattern>,
    /// Incidents not resolved and created before `period.end`
    pub open_incidents: Vec<SecurityIncident>,
    /// When the report was built
    pub generated_at: DateTime<Utc>,
}
