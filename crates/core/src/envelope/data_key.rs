//! Ephemeral data keys

use chrono::{DateTime, Utc};
use phivault_common::SecretBytes;
use phivault_domain::EncryptionContext;

/// A data key for one record or one field.
///
/// Deliberately not `Clone`: the plaintext key lives in exactly one place and
/// is zeroed when this value is dropped.
#[derive(Debug)]
pub struct DataKey {
    plaintext_key: SecretBytes,
    encrypted_key: Vec<u8>,
    key_id: String,
    context: EncryptionContext,
    created_at: DateTime<Utc>,
}

impl DataKey {
    pub(crate) fn new(
        plaintext_key: SecretBytes,
        encrypted_key: Vec<u8>,
        key_id: String,
        context: EncryptionContext,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { plaintext_key, encrypted_key, key_id, context, created_at }
    }

    pub(crate) fn plaintext_key(&self) -> &SecretBytes {
        &self.plaintext_key
    }

    /// Wrapped form of the key, safe to persist
    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    /// Master key that wrapped this data key
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Context the key was issued for
    pub fn context(&self) -> &EncryptionContext {
        &self.context
    }

    /// When the provider issued the key
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
