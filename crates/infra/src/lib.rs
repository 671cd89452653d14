//! # PhiVault Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - Key-management providers (in-process and HTTP)
//! - Audit stores (memory, JSON lines, SQLite)
//! - Incident storage
//! - Configuration loading and tracing initialisation
//! - [`PhiVaultRuntime`], which wires all of the above from a
//!   [`PhiVaultConfig`](phivault_domain::PhiVaultConfig)
//!
//! ## Architecture
//! - Implements traits defined in `phivault-core`
//! - Contains all "impure" code (files, sockets, SQLite)

pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod incidents;
pub mod kms;
pub mod observability;

// Re-export commonly used items
pub use audit::{InMemoryAuditStore, JsonlAuditStore, SqliteAuditStore};
pub use bootstrap::PhiVaultRuntime;
pub use errors::InfraError;
pub use incidents::InMemoryIncidentStore;
pub use kms::{HttpKeyProvider, LocalKeyProvider};
pub use observability::init_tracing;
