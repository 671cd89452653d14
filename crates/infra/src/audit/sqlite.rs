//! SQLite audit store
//!
//! Uses an r2d2 connection pool; every statement runs on the blocking pool
//! via `spawn_blocking`. Filter columns are stored alongside the full entry
//! JSON. Triggers abort any `UPDATE` or `DELETE` on `audit_log`, so the
//! table stays append-only even for callers that bypass this type.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phivault_core::{AuditQueryError, AuditStore, AuditWriteError};
use phivault_domain::{AuditFilter, AuditLogEntry, PageRequest};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use tokio::task;
use tracing::{info, instrument};

use crate::errors::{describe_sql_error, join_error, pool_error, sql_query_error, sql_write_error, InfraError};

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    actor_id TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    action TEXT NOT NULL,
    territory_id TEXT,
    created_at_us INTEGER NOT NULL,
    entry_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log (actor_id, created_at_us);
CREATE INDEX IF NOT EXISTS idx_audit_log_resource ON audit_log (resource_id, created_at_us);
CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log (created_at_us);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
";

const DEFAULT_POOL_SIZE: u32 = 4;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SqlitePool = Pool<SqliteConnectionManager>;

/// Audit store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: Arc<SqlitePool>,
    path: PathBuf,
}

impl SqliteAuditStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InfraError> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    /// Like [`open`](Self::open) with an explicit connection pool size
    #[instrument(skip_all, fields(db_path = %path.as_ref().display(), pool_size = pool_size))]
    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, InfraError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| InfraError::Storage(format!("cannot create {}: {e}", parent.display())))?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\n")?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| InfraError::Storage(format!("failed to create pool: {e}")))?;

        let conn = pool.get().map_err(|e| InfraError::Storage(pool_error(e)))?;
        create_schema(&conn).map_err(|e| InfraError::Storage(describe_sql_error(&e)))?;

        info!(max_connections = pool.max_size(), "sqlite audit store initialised");
        Ok(Self { pool: Arc::new(pool), path })
    }

    /// Database file backing the pool
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a pooled connection. Exposed for operational tooling; the
    /// append-only triggers still apply.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, InfraError> {
        self.pool.get().map_err(|e| InfraError::Storage(pool_error(e)))
    }

    fn insert(conn: &Connection, entry: &AuditLogEntry, json: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO audit_log (id, actor_id, resource_type, resource_id, action, territory_id, created_at_us, entry_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.to_string(),
                entry.actor_id,
                entry.resource_type,
                entry.resource_id,
                entry.action.to_string(),
                entry.territory_id,
                entry.created_at.timestamp_micros(),
                json,
            ],
        )?;
        Ok(())
    }

    fn select(conn: &Connection, filter: &AuditFilter, page: PageRequest) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        let (sql, values) = build_query(filter, page);
        let mut stmt = conn.prepare(&sql).map_err(sql_query_error)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .map_err(sql_query_error)?;

        let mut entries = Vec::new();
        for row in rows {
            let json = row.map_err(sql_query_error)?;
            let entry = serde_json::from_str(&json).map_err(|e| AuditQueryError::Serialization(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, CAST(strftime('%s','now') AS INTEGER))",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Translate a filter into a parameterised `SELECT` in append order.
fn build_query(filter: &AuditFilter, page: PageRequest) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    let text_columns = [
        ("actor_id", filter.actor_id.as_ref()),
        ("resource_id", filter.resource_id.as_ref()),
        ("resource_type", filter.resource_type.as_ref()),
        ("territory_id", filter.territory_id.as_ref()),
    ];
    for (column, value) in text_columns {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            values.push(SqlValue::Text(value.clone()));
        }
    }
    if let Some(action) = filter.action {
        clauses.push("action = ?".to_string());
        values.push(SqlValue::Text(action.to_string()));
    }
    if let Some(range) = filter.date_range {
        clauses.push("created_at_us >= ? AND created_at_us < ?".to_string());
        values.push(SqlValue::Integer(range.start.timestamp_micros()));
        values.push(SqlValue::Integer(range.end.timestamp_micros()));
    }

    let mut sql = String::from("SELECT entry_json FROM audit_log");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY seq ASC LIMIT ? OFFSET ?");
    values.push(SqlValue::Integer(i64::try_from(page.limit).unwrap_or(i64::MAX)));
    values.push(SqlValue::Integer(i64::try_from(page.offset).unwrap_or(i64::MAX)));

    (sql, values)
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        let json = serde_json::to_string(entry).map_err(|e| AuditWriteError::Serialization(e.to_string()))?;
        let pool = Arc::clone(&self.pool);
        let entry = entry.clone();

        task::spawn_blocking(move || -> Result<(), AuditWriteError> {
            let conn = pool.get().map_err(|e| AuditWriteError::Unavailable(pool_error(e)))?;
            Self::insert(&conn, &entry, &json).map_err(sql_write_error)
        })
        .await
        .map_err(|e| AuditWriteError::Unavailable(join_error(e)))?
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        let pool = Arc::clone(&self.pool);
        let filter = filter.clone();

        task::spawn_blocking(move || -> Result<Vec<AuditLogEntry>, AuditQueryError> {
            let conn = pool.get().map_err(|e| AuditQueryError::Unavailable(pool_error(e)))?;
            Self::select(&conn, &filter, page)
        })
        .await
        .map_err(|e| AuditQueryError::Unavailable(join_error(e)))?
    }
}
