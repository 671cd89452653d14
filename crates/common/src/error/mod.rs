//! Common error types and utilities shared by the PhiVault crates
//!
//! # Error Handling Architecture
//!
//! 1. **`CommonError`**: reusable error patterns (timeouts, serialization,
//!    backend failures) that module-specific errors compose with.
//! 2. **`ErrorClassification` trait**: a standard interface for classifying
//!    errors by retryability and severity. The retry executor in
//!    [`crate::resilience`] consumes it.
//! 3. **`ErrorSeverity` enum**: a unified severity level for logging.
//!
//! Error messages in this workspace never carry plaintext field values or
//! key material. Constructors accept identifiers (field names, key ids,
//! operation names) only.
//!
//! ## Composition
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum KeyProviderError {
//!     #[error("key provider unavailable: {0}")]
//!     Unavailable(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple modules
#[derive(Debug, Clone)]
pub enum CommonError {
    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// Timeout errors
    Timeout { operation: String, duration: Duration },

    /// Network or backend connectivity errors
    Backend { service: String, message: String, is_retryable: bool },

    /// Cryptographic failures (bad key length, AEAD failure)
    Crypto { operation: String, message: String },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Crypto { operation, message } => {
                write!(f, "Cryptographic failure during '{}': {}", operation, message)
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            Self::Serialization { .. } | Self::Crypto { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Backend { .. } => ErrorSeverity::Error,
            Self::Crypto { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Crypto { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl CommonError {
    /// Serialization error tagged with the offending format ("base64", "JSON")
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a timeout error for `operation`
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a backend error; `is_retryable` drives [`ErrorClassification`]
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a cryptographic failure
    pub fn crypto<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Crypto { operation: operation.into(), message: message.into() }
    }

    /// Get the error type name for categorization in log fields
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::Serialization { .. } => "serialization",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Crypto { .. } => "crypto",
        }
    }
}

/// Error classification trait for consistent error handling across modules
///
/// Implemented by every error enum in the workspace so that the retry
/// executor and the audit error sinks can make decisions without matching on
/// concrete variants.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: timeouts, temporarily unavailable key
    /// providers or audit stores. Authentication failures and malformed data
    /// are never retryable.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}
