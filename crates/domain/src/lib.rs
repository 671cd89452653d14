//! # PhiVault Domain
//!
//! Domain types and models for PhiVault.
//!
//! This crate contains:
//! - Envelope types (encryption context, persisted encrypted-field blob)
//! - Field policy entries and coercion kinds
//! - Audit log entries, filters and compliance report types
//! - Security incidents and monitor subject states
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other PhiVault crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
