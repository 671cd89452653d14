//! Append-only JSON-lines audit file
//!
//! One serialized [`AuditLogEntry`] per line. The file is only ever opened
//! for append; queries re-read it from the start.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use phivault_core::{AuditQueryError, AuditStore, AuditWriteError};
use phivault_domain::{AuditFilter, AuditLogEntry, PageRequest};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Audit store writing to a JSON-lines file
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    /// Serialises appends so lines never interleave.
    write_lock: Mutex<()>,
    sync_on_append: bool,
}

impl JsonlAuditStore {
    /// Use `path`, creating it (and its parent directory) on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()), sync_on_append: false }
    }

    /// `fsync` after every append.
    #[must_use]
    pub fn with_sync_on_append(mut self, enabled: bool) -> Self {
        self.sync_on_append = enabled;
        self
    }

    /// File the store appends to
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_for_append(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path).await
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    #[instrument(skip_all, fields(entry_id = %entry.id))]
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| AuditWriteError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = self
            .open_for_append()
            .await
            .map_err(|e| AuditWriteError::Unavailable(format!("cannot open audit file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AuditWriteError::Unavailable(format!("audit file write failed: {e}")))?;
        file.flush()
            .await
            .map_err(|e| AuditWriteError::Unavailable(format!("audit file flush failed: {e}")))?;
        if self.sync_on_append {
            file.sync_data()
                .await
                .map_err(|e| AuditWriteError::Unavailable(format!("audit file sync failed: {e}")))?;
        }
        debug!("audit entry appended to file");
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuditQueryError::Unavailable(format!("cannot open audit file: {e}"))),
        };

        let mut lines = BufReader::new(file).lines();
        let mut skipped = 0;
        let mut page_entries = Vec::new();
        let mut line_no = 0usize;

        while page_entries.len() < page.limit {
            let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| AuditQueryError::Unavailable(format!("audit file read failed: {e}")))?
            else {
                break;
            };
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditLogEntry = serde_json::from_str(&line).map_err(|e| {
                AuditQueryError::Serialization(format!("line {line_no}: {e}"))
            })?;
            if !filter.matches(&entry) {
                continue;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            page_entries.push(entry);
        }

        Ok(page_entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use phivault_domain::AuditAction;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;

    fn entry(actor: &str) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::now_v7(),
            actor_id: actor.into(),
            resource_type: "patient".into(),
            resource_id: "p1".into(),
            action: AuditAction::View,
            accessed_fields: vec!["mrn".into(), "ssn".into()],
            ip_address: Some("10.0.0.8".into()),
            session_id: None,
            request_id: Some("req-1".into()),
            reason: None,
            territory_id: Some("east".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("audit").join("phi.jsonl"));

        store.append(&entry("dr-a")).await.unwrap();
        store.append(&entry("dr-b")).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: AuditLogEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.actor_id, "dr-a");
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let dir = TempDir::new().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("phi.jsonl")).with_sync_on_append(true);
        for actor in ["dr-a", "dr-b", "dr-a", "dr-a"] {
            store.append(&entry(actor)).await.unwrap();
        }

        let filter = AuditFilter::new().actor("dr-a");
        let page_one = store.query(&filter, PageRequest::first(2)).await.unwrap();
        let page_two = store.query(&filter, PageRequest::first(2).next()).await.unwrap();

        assert_eq!(page_one.len(), 2);
        assert_eq!(page_two.len(), 1);
        assert!(page_one.iter().chain(&page_two).all(|e| e.actor_id == "dr-a"));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("never-written.jsonl"));

        let found = store.query(&AuditFilter::new(), PageRequest::first(10)).await.unwrap();

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn corrupt_line_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phi.jsonl");
        tokio::fs::write(&path, "{not json}\n").await.unwrap();

        let err = JsonlAuditStore::new(&path).query(&AuditFilter::new(), PageRequest::first(10)).await.unwrap_err();

        assert!(matches!(err, AuditQueryError::Serialization(msg) if msg.starts_with("line 1")));
    }
}
