//! # PhiVault Core
//!
//! Business logic for field-level PHI protection - no infrastructure
//! dependencies.
//!
//! This crate contains:
//! - The envelope encryption engine and its key-management port
//! - Field policy and record-level encryption
//! - Key rotation for records and batches
//! - The PHI access audit logger and its store/sink ports
//! - The access pattern monitor and its incident store port
//! - The record service composing all of the above
//!
//! ## Architecture Principles
//! - Only depends on `phivault-common` and `phivault-domain`
//! - No database, HTTP, or file code
//! - All external dependencies via traits

pub mod audit;
pub mod envelope;
pub mod errors;
pub mod monitor;
pub mod policy;
pub mod rotation;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use audit::ports::{AuditErrorSink, AuditFailure, AuditStore};
pub use audit::sinks::{ChannelErrorSink, FanOutErrorSink, TracingErrorSink};
pub use audit::AuditLogger;
pub use envelope::ports::{GeneratedDataKey, KeyManagementProvider};
pub use envelope::{DataKey, EnvelopeEngine};
pub use errors::{
    AuditQueryError, AuditWriteError, DecryptionError, EnvelopeError, FailureKind,
    KeyProviderError, MonitorError, RecordError, RecordServiceError, ReportError, RotationError,
    ValidationError,
};
pub use monitor::ports::IncidentStore;
pub use monitor::{detect_patterns, AccessPatternMonitor, MonitorEvent};
pub use policy::{FieldPolicy, RecordCipher};
pub use rotation::{
    KeyRotationSchedule, RecordSlot, RotatedRecord, RotationFailure, RotationJob, RotationManager,
    RotationReport, SlotUpdate,
};
pub use service::{PhiRecordService, RecordAccess};
