//! PHI access audit trail: the logger, its storage and failure-sink ports,
//! and the provided failure sinks.

mod logger;
pub mod ports;
pub mod sinks;

pub use logger::AuditLogger;
