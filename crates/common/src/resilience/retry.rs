//! Generic retry strategy with pluggable policies, backoff and jitter.
//!
//! The executor keeps the last error so callers can map an exhausted retry
//! back into their own error type instead of losing the cause.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use policies::ClassifiedRetry;

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted
    #[error("All retry attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32, source: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error")]
    NonRetryable { source: E },

    /// The retry strategy configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A timeout occurred during retry operations
    #[error("Retry timeout exceeded after {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration, source: Option<E> },
}

impl<E> RetryError<E> {
    /// Consume the error and return the last operation error, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::AttemptsExhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::TimeoutExceeded { source, .. } => source,
            Self::InvalidConfiguration { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Determine if the error should be retried and optionally provide a custom
    /// delay
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff: initial_delay * base^attempt, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the next delay for the given attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Full jitter: 0 to calculated_delay
    Full,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(random_up_to(delay_ms)),
            Jitter::Equal => {
                let half = delay_ms / 2;
                Duration::from_millis(half + random_up_to(delay_ms - half))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
    /// Maximum total time to spend retrying
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(100),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::Equal,
            max_total_time: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Configuration that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self { max_attempts: 1, jitter: Jitter::None, ..Self::default() }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        match &self.backoff {
            BackoffStrategy::Exponential { base, .. } if *base <= 0.0 => {
                return Err(RetryError::InvalidConfiguration {
                    message: "exponential base must be greater than 0".to_string(),
                });
            }
            _ => {}
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Builder seeded with [`RetryConfig::default`] values
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Total attempts including the first; must be at least 1
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Wait the same `delay` between attempts
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    /// Start at `initial_delay` and multiply by `base` per attempt, capped at
    /// `max_delay`
    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    /// Use the computed delays as they are
    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    /// Randomize each delay over `[0, delay]`
    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    /// Randomize each delay over `[delay / 2, delay]`
    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    /// Give up once `duration` has elapsed across all attempts
    pub fn max_total_time(mut self, duration: Duration) -> Self {
        self.config.max_total_time = Some(duration);
        self
    }

    /// Remove the total-time limit
    pub fn unlimited_time(mut self) -> Self {
        self.config.max_total_time = None;
        self
    }

    /// Validate and finish the configuration
    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Policy this executor runs with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if let Some(max_time) = self.config.max_total_time {
                let elapsed = start.elapsed();
                if attempt > 0 && elapsed >= max_time {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, attempts = attempt, "retry time budget exceeded");
                    return Err(RetryError::TimeoutExceeded { elapsed, source: last_error });
                }
            }

            let attempt_number = attempt + 1;
            debug!(attempt = attempt_number, "executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let decision = self.policy.should_retry(&error, attempt);
            if decision == RetryDecision::Stop {
                debug!(error = %error, "retry policy declined to retry");
                return Err(RetryError::NonRetryable { source: error });
            }

            if attempt_number >= self.config.max_attempts {
                warn!(attempts = attempt_number, error = %error, "all retry attempts exhausted");
                return Err(RetryError::AttemptsExhausted { attempts: attempt_number, source: error });
            }

            let delay = match decision {
                RetryDecision::RetryAfter(custom) => custom,
                _ => self.config.jitter.apply(self.config.backoff.calculate_delay(attempt)),
            };

            warn!(
                attempt = attempt_number,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed, retrying"
            );
            last_error = Some(error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};
    use crate::error::ErrorClassification;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries errors that classify themselves as retryable, honouring any
    /// suggested delay.
    #[derive(Debug, Clone, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Retry,
            }
        }
    }
}
