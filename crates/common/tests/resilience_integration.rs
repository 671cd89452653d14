//! Integration tests for the retry executor
//!
//! Exercises the classified retry policy against errors that report their
//! own retryability, the way key provider calls use it.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use phivault_common::{
    ClassifiedRetry, CommonError, RetryConfig, RetryError, RetryExecutor, RetryResult,
};

fn executor(max_attempts: u32) -> RetryExecutor<ClassifiedRetry> {
    let config = RetryConfig::builder()
        .max_attempts(max_attempts)
        .exponential_backoff(Duration::from_millis(1), 2.0, Duration::from_millis(5))
        .no_jitter()
        .build()
        .expect("valid retry config");
    RetryExecutor::new(config, ClassifiedRetry)
}

/// Transient failures are retried until the operation recovers.
#[tokio::test]
async fn transient_errors_recover_within_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result: RetryResult<&'static str, CommonError> = executor(4)
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CommonError::timeout("kms.generate_data_key", Duration::from_millis(1)))
                } else {
                    Ok("wrapped")
                }
            }
        })
        .await;

    assert_eq!(result.expect("should recover"), "wrapped");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// The last error survives exhaustion so callers can classify it.
#[tokio::test]
async fn exhausted_retry_surfaces_last_error() {
    let result: RetryResult<(), CommonError> = executor(3)
        .execute(|| async { Err(CommonError::backend("kms", "service unavailable", true)) })
        .await;

    let err = result.expect_err("should exhaust");
    assert!(matches!(err, RetryError::AttemptsExhausted { attempts: 3, .. }));
    let source = err.into_source().expect("last error retained");
    assert_eq!(source.error_type_name(), "backend");
}

/// Permanent failures are not retried.
#[tokio::test]
async fn permanent_errors_fail_fast() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result: RetryResult<(), CommonError> = executor(5)
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CommonError::crypto("open", "authentication failed"))
            }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
