//! Port interface for key-management providers
//!
//! The provider is the trust boundary: it issues data keys, wraps them under
//! a master key with the encryption context as associated data, and unwraps
//! them only when the same context is presented again.

use async_trait::async_trait;
use phivault_common::SecretBytes;
use phivault_domain::EncryptionContext;

use crate::errors::KeyProviderError;

/// Fresh data key as returned by the provider
#[derive(Debug)]
pub struct GeneratedDataKey {
    /// Key material; never persisted
    pub plaintext_key: SecretBytes,
    /// Data key wrapped under the master key
    pub encrypted_key: Vec<u8>,
    /// Master key that wrapped it
    pub key_id: String,
}

/// Client-side contract of a key-management service
///
/// Implementations must be safe for concurrent use; the engine shares one
/// handle across tasks.
#[async_trait]
pub trait KeyManagementProvider: Send + Sync {
    /// Issue a data key bound to `context`, wrapped by master key `key_id`
    /// or by the provider's active key when `None`.
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<GeneratedDataKey, KeyProviderError>;

    /// Encrypt a small payload under the active master key with an empty
    /// context.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError>;

    /// Unwrap `ciphertext`, failing unless `context` matches the context it
    /// was wrapped with.
    ///
    /// When `key_id` is given the ciphertext must have been wrapped by that
    /// master key; a mismatch or an id the provider does not hold fails with
    /// [`KeyProviderError::UnknownKey`].
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<SecretBytes, KeyProviderError>;

    /// Retire `old_key_id` and return the id of its successor.
    ///
    /// Must be idempotent: rotating an already-retired key returns its
    /// current successor rather than minting another one.
    async fn rotate_master_key(&self, old_key_id: &str) -> Result<String, KeyProviderError>;
}
