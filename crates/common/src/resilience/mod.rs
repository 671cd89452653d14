//! Resilience patterns for calls that cross a process boundary
//!
//! Key provider requests are the main consumer: transient failures
//! (timeouts, unavailable backends) are retried with exponential backoff and
//! jitter, everything else surfaces on the first attempt.

pub mod retry;

pub use retry::{
    policies, BackoffStrategy, ClassifiedRetry, Jitter, RetryConfig, RetryConfigBuilder,
    RetryDecision, RetryError, RetryExecutor, RetryPolicy, RetryResult,
};
