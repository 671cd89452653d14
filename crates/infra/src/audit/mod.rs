//! Audit store implementations
//!
//! All three stores are append-only: the [`AuditStore`] port has no update
//! or delete, and the SQLite schema additionally aborts any `UPDATE` or
//! `DELETE` issued against the table directly.
//!
//! [`AuditStore`]: phivault_core::AuditStore

pub mod jsonl;
pub mod memory;
pub mod sqlite;

pub use jsonl::JsonlAuditStore;
pub use memory::InMemoryAuditStore;
pub use sqlite::SqliteAuditStore;
