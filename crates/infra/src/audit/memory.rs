//! In-memory audit store

use async_trait::async_trait;
use parking_lot::RwLock;
use phivault_core::{AuditQueryError, AuditStore, AuditWriteError};
use phivault_domain::{AuditFilter, AuditLogEntry, PageRequest};

/// Audit store held in process memory. Entries are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// `true` before the first append
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }
}
