//! Envelope encryption engine
//!
//! Holds no mutable state beyond the shared provider handle, so one engine
//! can be cloned into every task. Each provider call runs under a per-call
//! timeout inside the retry executor; only errors that classify as
//! retryable are attempted again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use phivault_common::crypto::encryption::KEY_LEN;
use phivault_common::crypto::{decode_base64, encode_base64};
use phivault_common::{
    AeadCipher, BackoffStrategy, ClassifiedRetry, Clock, RetryConfig, RetryExecutor, SealedData,
    SystemClock,
};
use phivault_domain::{EncryptedField, EncryptionContext, KmsSettings};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use super::data_key::DataKey;
use super::ports::KeyManagementProvider;
use crate::errors::{DecryptionError, EnvelopeError, KeyProviderError};

/// Default upper bound for a single provider call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Envelope encryption engine
#[derive(Clone)]
pub struct EnvelopeEngine {
    provider: Arc<dyn KeyManagementProvider>,
    retry: RetryExecutor<ClassifiedRetry>,
    call_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for EnvelopeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeEngine")
            .field("call_timeout", &self.call_timeout)
            .field("max_attempts", &self.retry.config().max_attempts)
            .finish_non_exhaustive()
    }
}

impl EnvelopeEngine {
    /// Create an engine with the default timeout and retry policy
    pub fn new(provider: Arc<dyn KeyManagementProvider>) -> Self {
        Self {
            provider,
            retry: RetryExecutor::new(RetryConfig::default(), ClassifiedRetry),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create an engine whose call policy follows `settings`
    pub fn from_settings(provider: Arc<dyn KeyManagementProvider>, settings: &KmsSettings) -> Self {
        let retry = RetryConfig {
            max_attempts: settings.max_attempts.max(1),
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(settings.initial_backoff_ms),
                base: 2.0,
                max_delay: Duration::from_millis(settings.max_backoff_ms),
            },
            ..RetryConfig::default()
        };
        Self::new(provider)
            .with_retry_config(retry)
            .with_call_timeout(Duration::from_millis(settings.request_timeout_ms))
    }

    /// Retry policy for provider calls. Only transient errors are retried.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config, ClassifiedRetry);
        self
    }

    /// Deadline for each provider attempt; an expired attempt counts as a
    /// transient failure.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Clock used for `encrypted_at` stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Request a fresh data key bound to `context` from the provider's
    /// active master key.
    pub async fn create_data_key(&self, context: &EncryptionContext) -> Result<DataKey, EnvelopeError> {
        self.create_data_key_with(context, None).await
    }

    /// Request a fresh data key wrapped by a specific master key.
    #[instrument(skip_all, fields(key_id = key_id.unwrap_or("active")))]
    pub async fn create_data_key_with(
        &self,
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<DataKey, EnvelopeError> {
        let provider = &self.provider;
        let generated = self
            .call("generate_data_key", move || provider.generate_data_key(context, key_id))
            .await?;

        if generated.plaintext_key.len() != KEY_LEN {
            return Err(KeyProviderError::Malformed("data key has unexpected length".into()).into());
        }

        debug!(key_id = %generated.key_id, "data key issued");
        Ok(DataKey::new(
            generated.plaintext_key,
            generated.encrypted_key,
            generated.key_id,
            context.clone(),
            self.clock.now(),
        ))
    }

    /// Encrypt `plaintext` under `context`.
    ///
    /// Without `data_key` a one-time key is requested and dropped (zeroed)
    /// before returning. A supplied key must have been issued for exactly
    /// this context.
    #[instrument(skip_all, fields(reuse_key = data_key.is_some()))]
    pub async fn encrypt_field(
        &self,
        plaintext: &str,
        context: &EncryptionContext,
        data_key: Option<&DataKey>,
    ) -> Result<EncryptedField, EnvelopeError> {
        if let Some(key) = data_key {
            return self.seal_with(plaintext, context, key);
        }

        let key = self.create_data_key(context).await?;
        self.seal_with(plaintext, context, &key)
    }

    /// Decrypt `field`, presenting `context` to the provider.
    ///
    /// A caller context that differs from the stored one fails fast with
    /// [`DecryptionError::ContextMismatch`] without a provider call; the
    /// provider and the field cipher both authenticate the context again.
    /// The provider must unwrap with the master key named by `field.key_id`,
    /// otherwise the call fails with [`DecryptionError::UnknownKey`].
    #[instrument(skip_all, fields(key_id = %field.key_id))]
    pub async fn decrypt_field(
        &self,
        field: &EncryptedField,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<String>, EnvelopeError> {
        if field.encryption_context != *context {
            warn!(key_id = %field.key_id, "decryption refused: context mismatch");
            return Err(DecryptionError::ContextMismatch.into());
        }

        let wrapped = decode_base64(&field.encrypted_key)
            .map_err(|_| DecryptionError::Malformed("encrypted_key is not base64".into()))?;
        let sealed = SealedData::from_base64(&field.encrypted_data)
            .map_err(|_| DecryptionError::Malformed("encrypted_data is not a sealed payload".into()))?;

        let provider = &self.provider;
        let wrapped = wrapped.as_slice();
        let key_id = field.key_id.as_str();
        let data_key = self
            .call("decrypt", move || provider.decrypt(wrapped, context, Some(key_id)))
            .await
            .map_err(|err| match err {
                KeyProviderError::InvalidCiphertext => {
                    EnvelopeError::Decryption(DecryptionError::AuthenticationFailed)
                }
                KeyProviderError::UnknownKey(id) => {
                    EnvelopeError::Decryption(DecryptionError::UnknownKey(id))
                }
                other => EnvelopeError::KeyProvider(other),
            })?;

        let cipher = AeadCipher::new(data_key.expose())
            .map_err(|_| DecryptionError::Malformed("unwrapped data key has unexpected length".into()))?;
        let plaintext = cipher
            .open(&sealed, &context.canonical_bytes())
            .map_err(|_| DecryptionError::AuthenticationFailed)?;

        let text = plaintext
            .expose_str()
            .ok_or_else(|| DecryptionError::Malformed("plaintext is not UTF-8".into()))?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    /// Re-encrypt `field` under a fresh data key from the successor of its
    /// master key, keeping or replacing its context.
    pub async fn rotate(
        &self,
        field: &EncryptedField,
        new_context: Option<&EncryptionContext>,
    ) -> Result<EncryptedField, EnvelopeError> {
        let current = field.encryption_context.clone();
        self.rotate_under(field, &current, new_context, None).await
    }

    /// Rotation with an explicit current context and optional target master
    /// key. Without `target_key_id` the provider's successor of
    /// `field.key_id` is used.
    #[instrument(skip_all, fields(old_key_id = %field.key_id))]
    pub async fn rotate_under(
        &self,
        field: &EncryptedField,
        current_context: &EncryptionContext,
        new_context: Option<&EncryptionContext>,
        target_key_id: Option<&str>,
    ) -> Result<EncryptedField, EnvelopeError> {
        let plaintext = self.decrypt_field(field, current_context).await?;

        let new_key_id = match target_key_id {
            Some(id) => id.to_owned(),
            None => self.rotate_master_key(&field.key_id).await?,
        };

        let context = new_context.unwrap_or(current_context);
        let key = self.create_data_key_with(context, Some(&new_key_id)).await?;
        let rotated = self.seal_with(&plaintext, context, &key)?;

        debug!(new_key_id = %rotated.key_id, "field rotated");
        Ok(rotated)
    }

    /// Ask the provider for the successor of `old_key_id`.
    pub async fn rotate_master_key(&self, old_key_id: &str) -> Result<String, EnvelopeError> {
        let provider = &self.provider;
        Ok(self.call("rotate_master_key", move || provider.rotate_master_key(old_key_id)).await?)
    }

    fn seal_with(
        &self,
        plaintext: &str,
        context: &EncryptionContext,
        key: &DataKey,
    ) -> Result<EncryptedField, EnvelopeError> {
        if key.context() != context {
            return Err(EnvelopeError::DataKeyContextMismatch);
        }

        let cipher = AeadCipher::new(key.plaintext_key().expose())
            .map_err(|e| EnvelopeError::Encryption(e.error_type_name().to_string()))?;
        let sealed = cipher
            .seal(plaintext.as_bytes(), &context.canonical_bytes())
            .map_err(|e| EnvelopeError::Encryption(e.error_type_name().to_string()))?;

        Ok(EncryptedField {
            encrypted_data: sealed.to_base64(),
            encrypted_key: encode_base64(key.encrypted_key()),
            key_id: key.key_id().to_owned(),
            encryption_context: context.clone(),
            encrypted_at: self.clock.now(),
        })
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, KeyProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KeyProviderError>>,
    {
        let timeout = self.call_timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        self.retry
            .execute(|| {
                let attempt = op();
                async move {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .map_err(|_| KeyProviderError::Timeout { operation, timeout_ms })?
                }
            })
            .await
            .map_err(|err| {
                err.into_source().unwrap_or_else(|| {
                    KeyProviderError::Unavailable(format!("{operation}: retry budget exhausted"))
                })
            })
    }
}
