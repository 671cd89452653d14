//! Domain types and models

pub mod audit;
pub mod envelope;
pub mod incident;

pub use audit::{
    AccessPattern, AuditAction, AuditFilter, AuditLogEntry, AuditReport, DateRange, PageRequest,
    RequestContext,
};
pub use envelope::{EncryptedField, EncryptionContext, FieldKind, FieldPolicyEntry};
pub use incident::{
    IncidentSeverity, IncidentStatus, MonitoredSubject, ReviewDecision, SecurityIncident,
    SubjectState,
};
