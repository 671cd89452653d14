//! Conversions from external infrastructure errors into core error types.

use phivault_core::{AuditQueryError, AuditWriteError, KeyProviderError};
use phivault_domain::PhiVaultError;
use rusqlite::Error as SqlError;
use thiserror::Error;
use tokio::task::JoinError;

/// Failures assembling the runtime from configuration
#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Config(#[from] PhiVaultError),

    #[error("storage initialisation failed: {0}")]
    Storage(String),

    #[error("key provider initialisation failed: {0}")]
    KeyProvider(String),
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → audit errors */
/* -------------------------------------------------------------------------- */

/// Human-readable description of a SQLite failure.
///
/// Values bound into statements never appear in rusqlite's messages, so the
/// description is safe to log.
pub(crate) fn describe_sql_error(err: &SqlError) -> String {
    use rusqlite::ffi::ErrorCode;

    match err {
        SqlError::SqliteFailure(failure, message) => {
            let message = message.as_deref().unwrap_or_default();
            match failure.code {
                ErrorCode::DatabaseBusy => "database is busy".into(),
                ErrorCode::DatabaseLocked => "database is locked".into(),
                ErrorCode::ConstraintViolation if message.contains("append-only") => {
                    "audit log is append-only".into()
                }
                _ => format!(
                    "sqlite failure {:?} (code {}): {}",
                    failure.code, failure.extended_code, message
                ),
            }
        }
        SqlError::FromSqlConversionFailure(_, _, cause) => {
            format!("failed to convert sqlite value: {cause}")
        }
        SqlError::InvalidColumnType(_, name, ty) => format!("invalid column type for {name}: {ty}"),
        SqlError::Utf8Error(_) => "invalid UTF-8 returned from sqlite".into(),
        other => other.to_string(),
    }
}

pub(crate) fn sql_write_error(err: SqlError) -> AuditWriteError {
    AuditWriteError::Unavailable(describe_sql_error(&err))
}

pub(crate) fn sql_query_error(err: SqlError) -> AuditQueryError {
    match err {
        SqlError::FromSqlConversionFailure(..) | SqlError::InvalidColumnType(..) => {
            AuditQueryError::Serialization(describe_sql_error(&err))
        }
        other => AuditQueryError::Unavailable(describe_sql_error(&other)),
    }
}

pub(crate) fn pool_error(err: r2d2::Error) -> String {
    format!("connection pool exhausted: {err}")
}

pub(crate) fn join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        "blocking task cancelled".into()
    } else {
        "blocking task panicked".into()
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → KeyProviderError */
/* -------------------------------------------------------------------------- */

/// Map a transport-level failure. Status codes are handled by the caller.
pub(crate) fn http_transport_error(err: &reqwest::Error) -> KeyProviderError {
    if err.is_timeout() {
        KeyProviderError::Unavailable("request timed out".into())
    } else if err.is_connect() {
        KeyProviderError::Unavailable("connection failed".into())
    } else if err.is_decode() {
        KeyProviderError::Malformed("response body could not be decoded".into())
    } else {
        KeyProviderError::Unavailable(format!("http transport error: {err}"))
    }
}
