//! Modular common utilities shared across PhiVault crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification and the shared error enum
//! - `runtime`: AEAD cipher, zeroizing secrets, retry executor, clocks
//! - `observability`: tracing instrumentation (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod crypto;
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod security;
#[cfg(feature = "runtime")]
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use crypto::{AeadCipher, SealedData};
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffStrategy, ClassifiedRetry, Jitter, RetryConfig, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, RetryResult,
};
#[cfg(feature = "runtime")]
pub use security::SecretBytes;
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, SystemClock};
