//! Port interfaces for audit persistence and failure reporting
//!
//! These traits define the boundaries between the audit logger and the
//! storage backends that hold the append-only access trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phivault_domain::{AuditAction, AuditFilter, AuditLogEntry, PageRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AuditQueryError, AuditWriteError};

/// Append-only audit storage
///
/// There is deliberately no update or delete operation.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry. Entries are returned by [`query`](Self::query) in
    /// append order.
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError>;

    /// Return at most `page.limit` matching entries, skipping the first
    /// `page.offset` matches.
    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError>;
}

/// An audit write that did not reach the store
///
/// Carries identifiers only, so it can be forwarded to alerting without
/// leaking PHI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFailure {
    /// Id of the entry that was not stored
    pub entry_id: Uuid,
    /// Actor of the lost entry
    pub actor_id: String,
    /// Resource type of the lost entry
    pub resource_type: String,
    /// Resource id of the lost entry
    pub resource_id: String,
    /// Action of the lost entry
    pub action: AuditAction,
    /// Store error, rendered
    pub error: String,
    /// When the write was attempted
    pub occurred_at: DateTime<Utc>,
}

impl AuditFailure {
    pub(crate) fn new(entry: &AuditLogEntry, error: &AuditWriteError, occurred_at: DateTime<Utc>) -> Self {
        Self {
            entry_id: entry.id,
            actor_id: entry.actor_id.clone(),
            resource_type: entry.resource_type.clone(),
            resource_id: entry.resource_id.clone(),
            action: entry.action,
            error: error.to_string(),
            occurred_at,
        }
    }
}

/// Receiver for audit write failures. Called synchronously on the
/// request path, so implementations must not block.
pub trait AuditErrorSink: Send + Sync {
    fn report(&self, failure: &AuditFailure);
}
