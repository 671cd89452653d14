//! Record-level encryption driven by the field policy

use std::sync::Arc;

use phivault_domain::{EncryptedField, EncryptionContext, FieldKind};
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::field_policy::FieldPolicy;
use crate::envelope::EnvelopeEngine;
use crate::errors::{RecordError, ValidationError};

/// Encrypts and decrypts the protected fields of plain records
#[derive(Debug, Clone)]
pub struct RecordCipher {
    policy: Arc<FieldPolicy>,
    engine: EnvelopeEngine,
}

impl RecordCipher {
    /// Cipher applying `policy` through `engine`
    pub fn new(policy: Arc<FieldPolicy>, engine: EnvelopeEngine) -> Self {
        Self { policy, engine }
    }

    /// Policy deciding which fields are encrypted
    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// Engine the fields are sealed with
    pub fn engine(&self) -> &EnvelopeEngine {
        &self.engine
    }

    /// Encrypt every protected, non-null field of `record` under `context`.
    ///
    /// All fields share one data key. Values are coerced before the key is
    /// requested, so a coercion error costs no provider call. Fields that
    /// already hold a blob pass through, as do unprotected fields.
    #[instrument(skip_all)]
    pub async fn encrypt_record(
        &self,
        record: &Map<String, Value>,
        context: &EncryptionContext,
    ) -> Result<Map<String, Value>, RecordError> {
        let mut pending: Vec<(&str, Zeroizing<String>)> = Vec::new();
        for (name, value) in record {
            let Some(kind) = self.policy.kind(name) else { continue };
            if value.is_null() || EncryptedField::is_blob(value) {
                continue;
            }
            let text = self.policy.coerce(name, kind, value)?;
            pending.push((name.as_str(), Zeroizing::new(text)));
        }

        let mut output = record.clone();
        let Some((first, _)) = pending.first() else {
            return Ok(output);
        };

        let data_key = self
            .engine
            .create_data_key(context)
            .await
            .map_err(|source| RecordError::Envelope { field: (*first).to_string(), source })?;

        for (name, plaintext) in &pending {
            let blob = self
                .engine
                .encrypt_field(plaintext, context, Some(&data_key))
                .await
                .map_err(|source| RecordError::Envelope { field: (*name).to_string(), source })?;
            output.insert((*name).to_string(), blob.to_value());
        }

        debug!(fields = pending.len(), key_id = %data_key.key_id(), "record encrypted");
        Ok(output)
    }

    /// Decrypt every protected field that holds a blob. Legacy plaintext
    /// and unprotected fields pass through unchanged.
    #[instrument(skip_all)]
    pub async fn decrypt_record(
        &self,
        record: &Map<String, Value>,
        context: &EncryptionContext,
    ) -> Result<Map<String, Value>, RecordError> {
        let mut output = record.clone();

        for (name, value) in record {
            let Some(kind) = self.policy.kind(name) else { continue };
            let Some(blob) = EncryptedField::from_value(value) else { continue };

            let plaintext = self
                .engine
                .decrypt_field(&blob, context)
                .await
                .map_err(|source| RecordError::Envelope { field: name.clone(), source })?;
            output.insert(name.clone(), self.policy.restore(kind, &plaintext));
        }

        Ok(output)
    }

    /// See [`FieldPolicy::validate_fully_encrypted`].
    pub fn validate_fully_encrypted(&self, record: &Map<String, Value>) -> Result<(), ValidationError> {
        self.policy.validate_fully_encrypted(record)
    }

    /// Names of the protected fields present in `record`, sorted.
    pub fn accessed_fields(&self, record: &Map<String, Value>) -> Vec<String> {
        let mut fields: Vec<String> = record
            .iter()
            .filter(|(name, value)| !value.is_null() && self.policy.is_protected(name))
            .map(|(name, _)| name.clone())
            .collect();
        fields.sort();
        fields
    }

    /// Kind of `field`, for callers rendering decrypted values themselves
    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.policy.kind(field)
    }
}
