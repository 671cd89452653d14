//! Error taxonomy for envelope encryption, auditing and monitoring
//!
//! Messages carry identifiers only (field names, key ids, incident ids).
//! Plaintext, key bytes and PHI values never appear in an error or its
//! `Debug` output.

use std::time::Duration;

use phivault_common::error::{ErrorClassification, ErrorSeverity};
use phivault_domain::IncidentStatus;
use thiserror::Error;
use uuid::Uuid;

/// Whether the caller may retry the failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Failures reported by a key-management provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyProviderError {
    #[error("key provider unavailable: {0}")]
    Unavailable(String),

    #[error("key provider call '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    #[error("key provider denied the request: {0}")]
    Denied(String),

    #[error("unknown master key '{0}'")]
    UnknownKey(String),

    #[error("key provider rejected the wrapped key or its context")]
    InvalidCiphertext,

    #[error("malformed key provider payload: {0}")]
    Malformed(String),
}

impl ErrorClassification for KeyProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Denied(_) | Self::UnknownKey(_) | Self::Malformed(_) => ErrorSeverity::Error,
            Self::InvalidCiphertext => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidCiphertext)
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Failures decrypting a stored blob. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionError {
    #[error("encryption context does not match the blob")]
    ContextMismatch,

    #[error("ciphertext failed authentication")]
    AuthenticationFailed,

    #[error("malformed encrypted field: {0}")]
    Malformed(String),

    #[error("blob references unknown master key '{0}'")]
    UnknownKey(String),
}

/// Error returned by every envelope engine operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    KeyProvider(#[from] KeyProviderError),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error("field encryption failed: {0}")]
    Encryption(String),

    #[error("data key was issued for a different encryption context")]
    DataKeyContextMismatch,
}

impl EnvelopeError {
    /// Transient failures may be retried by the API layer; permanent ones
    /// should be surfaced as-is.
    pub fn kind(&self) -> FailureKind {
        if self.is_retryable() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

impl ErrorClassification for EnvelopeError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::KeyProvider(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::KeyProvider(e) => e.severity(),
            Self::Decryption(DecryptionError::AuthenticationFailed) => ErrorSeverity::Critical,
            Self::Decryption(_) => ErrorSeverity::Error,
            Self::Encryption(_) => ErrorSeverity::Critical,
            Self::DataKeyContextMismatch => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Write-time policy violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("protected field '{field}' is not encrypted")]
    UnencryptedField { field: String },

    #[error("protected field '{field}' holds a malformed encrypted blob")]
    MalformedBlob { field: String },
}

/// Failures encrypting or decrypting a whole record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("field '{field}' cannot be coerced to {expected}")]
    Coercion { field: String, expected: &'static str },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("envelope operation failed for field '{field}': {source}")]
    Envelope {
        field: String,
        #[source]
        source: EnvelopeError,
    },
}

impl RecordError {
    /// Coarse failure class used by callers deciding whether to retry
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Envelope { source, .. } => source.kind(),
            _ => FailureKind::Permanent,
        }
    }
}

/// Failures appending to the audit store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditWriteError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    #[error("audit write timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("audit entry serialization failed: {0}")]
    Serialization(String),
}

impl ErrorClassification for AuditWriteError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Failures reading the audit store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditQueryError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    #[error("stored audit entry could not be decoded: {0}")]
    Serialization(String),

    #[error("invalid audit filter: {0}")]
    InvalidFilter(String),

    #[error("audit export failed: {0}")]
    Export(String),
}

/// Failures producing a compliance report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error(transparent)]
    Query(#[from] AuditQueryError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Failures rotating a record. The input record is never modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    #[error("rotation failed for field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: EnvelopeError,
    },

    #[error("master key rotation failed: {0}")]
    KeyProvider(#[from] KeyProviderError),

    /// The rotation target is the master key the field is already under
    #[error("field '{field}' is already encrypted under master key '{key_id}'")]
    SameKey { field: String, key_id: String },
}

/// Failures in the access pattern monitor and incident workflow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("security incident {0} not found")]
    IncidentNotFound(Uuid),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("resolving an incident requires a resolution note")]
    MissingResolution,

    #[error("incident store error: {0}")]
    Store(String),
}

impl MonitorError {
    pub(crate) fn status_transition(from: IncidentStatus, to: IncidentStatus) -> Self {
        Self::InvalidTransition { from: from.to_string(), to: to.to_string() }
    }
}

/// Failures surfaced by the record service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordServiceError {
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Only returned when the service runs fail-closed
    #[error("access could not be audited: {0}")]
    Audit(#[from] AuditWriteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_outages_are_transient() {
        let err = EnvelopeError::from(KeyProviderError::Unavailable("503".into()));
        assert_eq!(err.kind(), FailureKind::Transient);

        let err = EnvelopeError::from(KeyProviderError::Timeout {
            operation: "decrypt",
            timeout_ms: 100,
        });
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[test]
    fn decryption_failures_are_permanent() {
        for err in [
            DecryptionError::ContextMismatch,
            DecryptionError::AuthenticationFailed,
            DecryptionError::UnknownKey("k1".into()),
        ] {
            assert_eq!(EnvelopeError::from(err).kind(), FailureKind::Permanent);
        }
        assert_eq!(
            EnvelopeError::from(KeyProviderError::Denied("policy".into())).kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn record_error_kind_follows_envelope_source() {
        let err = RecordError::Envelope {
            field: "ssn".into(),
            source: KeyProviderError::Unavailable("down".into()).into(),
        };
        assert_eq!(err.kind(), FailureKind::Transient);
        assert!(err.to_string().contains("'ssn'"));
    }

    #[test]
    fn authentication_failure_is_critical() {
        let err = EnvelopeError::Decryption(DecryptionError::AuthenticationFailed);
        assert!(err.is_critical());
        assert!(!err.is_retryable());
    }
}
