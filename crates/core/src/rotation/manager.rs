//! Record and batch key rotation

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use phivault_domain::{EncryptedField, EncryptionContext};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::envelope::{DataKey, EnvelopeEngine};
use crate::errors::{EnvelopeError, RotationError};
use crate::policy::FieldPolicy;

const DEFAULT_CONCURRENCY: usize = 8;

/// One record queued for batch rotation
#[derive(Debug, Clone)]
pub struct RotationJob {
    /// Caller identifier echoed in the report
    pub record_id: String,
    /// Record as stored, protected fields encrypted
    pub record: Map<String, Value>,
    /// Context the record was encrypted under
    pub context: EncryptionContext,
}

/// A record re-encrypted under its new master key
#[derive(Debug, Clone)]
pub struct RotatedRecord {
    /// Identifier the record was submitted with
    pub record_id: String,
    /// Record re-encrypted under the new key
    pub record: Map<String, Value>,
}

/// A record that could not be rotated, returned exactly as submitted
#[derive(Debug, Clone)]
pub struct RotationFailure {
    /// Identifier the record was submitted with
    pub record_id: String,
    /// Record exactly as submitted
    pub record: Map<String, Value>,
    /// Why the record was not rotated
    pub error: RotationError,
}

/// Outcome of [`RotationManager::rotate_batch`], in submission order
#[derive(Debug, Clone, Default)]
pub struct RotationReport {
    /// Records that now use the new master key
    pub rotated: Vec<RotatedRecord>,
    /// Records left as submitted
    pub failed: Vec<RotationFailure>,
}

impl RotationReport {
    /// `true` when no record failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Re-encrypts protected fields under a new master key
#[derive(Debug, Clone)]
pub struct RotationManager {
    engine: EnvelopeEngine,
    policy: Arc<FieldPolicy>,
    concurrency: usize,
}

impl RotationManager {
    /// Manager rotating fields protected by `policy` through `engine`
    pub fn new(engine: EnvelopeEngine, policy: Arc<FieldPolicy>) -> Self {
        Self { engine, policy, concurrency: DEFAULT_CONCURRENCY }
    }

    /// Number of records rotated at once by [`rotate_batch`](Self::rotate_batch)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Rotate every protected blob in `record`, returning a new record.
    ///
    /// Without `new_key_hint` each blob moves to the provider's successor of
    /// its current master key. Fields share one new data key per target
    /// master key, and only one field's plaintext is held at a time. A
    /// target equal to a field's current master key fails with
    /// [`RotationError::SameKey`]. On error the input is untouched and
    /// nothing is returned.
    #[instrument(skip_all, fields(hint = new_key_hint.unwrap_or("successor")))]
    pub async fn rotate_record(
        &self,
        record: &Map<String, Value>,
        old_context: &EncryptionContext,
        new_key_hint: Option<&str>,
    ) -> Result<Map<String, Value>, RotationError> {
        let mut output = record.clone();
        let mut successors: HashMap<String, String> = HashMap::new();
        let mut data_keys: HashMap<String, DataKey> = HashMap::new();

        for (name, value) in record {
            if !self.policy.is_protected(name) {
                continue;
            }
            let Some(blob) = EncryptedField::from_value(value) else { continue };
            let field_error = |source: EnvelopeError| RotationError::Field { field: name.clone(), source };

            let target = match new_key_hint {
                Some(hint) => hint.to_string(),
                None => match successors.get(&blob.key_id) {
                    Some(next) => next.clone(),
                    None => {
                        let next = self.engine.rotate_master_key(&blob.key_id).await.map_err(|err| match err {
                            EnvelopeError::KeyProvider(source) => RotationError::KeyProvider(source),
                            other => field_error(other),
                        })?;
                        successors.insert(blob.key_id.clone(), next.clone());
                        next
                    }
                },
            };
            if target == blob.key_id {
                return Err(RotationError::SameKey { field: name.clone(), key_id: target });
            }

            let plaintext = self.engine.decrypt_field(&blob, old_context).await.map_err(field_error)?;

            if !data_keys.contains_key(&target) {
                let key = self.engine.create_data_key_with(old_context, Some(&target)).await.map_err(field_error)?;
                data_keys.insert(target.clone(), key);
            }
            let data_key = data_keys.get(&target).ok_or_else(|| {
                field_error(EnvelopeError::Encryption("data key cache miss".to_string()))
            })?;

            let rotated = self
                .engine
                .encrypt_field(&plaintext, old_context, Some(data_key))
                .await
                .map_err(field_error)?;
            drop(plaintext);

            debug!(field = %name, old_key_id = %blob.key_id, new_key_id = %rotated.key_id, "field rotated");
            output.insert(name.clone(), rotated.to_value());
        }

        Ok(output)
    }

    /// Rotate records independently. A failure leaves that record exactly
    /// as submitted and does not affect the others. Results keep input
    /// order.
    pub async fn rotate_batch(&self, jobs: Vec<RotationJob>, new_key_hint: Option<&str>) -> RotationReport {
        let total = jobs.len();
        let outcomes: Vec<_> = stream::iter(jobs)
            .map(|job| async move {
                let result = self.rotate_record(&job.record, &job.context, new_key_hint).await;
                (job, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = RotationReport::default();
        for (job, result) in outcomes {
            match result {
                Ok(record) => report.rotated.push(RotatedRecord { record_id: job.record_id, record }),
                Err(error) => {
                    warn!(record_id = %job.record_id, error = %error, "record rotation failed");
                    report.failed.push(RotationFailure { record_id: job.record_id, record: job.record, error });
                }
            }
        }

        info!(total, rotated = report.rotated.len(), failed = report.failed.len(), "rotation batch finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::envelope::ports::KeyManagementProvider;
    use crate::errors::{DecryptionError, KeyProviderError};
    use crate::policy::RecordCipher;
    use crate::testing::FakeKeyProvider;

    struct Fixture {
        provider: Arc<FakeKeyProvider>,
        cipher: RecordCipher,
        manager: RotationManager,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(FakeKeyProvider::new());
        let engine = EnvelopeEngine::new(Arc::clone(&provider) as Arc<dyn KeyManagementProvider>);
        let policy = Arc::new(FieldPolicy::default());
        Fixture {
            cipher: RecordCipher::new(Arc::clone(&policy), engine.clone()),
            manager: RotationManager::new(engine, policy),
            provider,
        }
    }

    fn patient(id: &str) -> Map<String, Value> {
        json!({"id": id, "ssn": "123-45-6789", "mrn": "MRN-1", "allergies": ["latex"], "status": "active"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn context(id: &str) -> EncryptionContext {
        EncryptionContext::for_resource("patient", id)
    }

    fn key_ids(record: &Map<String, Value>) -> Vec<String> {
        record.values().filter_map(EncryptedField::from_value).map(|b| b.key_id).collect()
    }

    #[tokio::test]
    async fn rotated_record_decrypts_to_same_values_under_new_key() {
        let f = fixture();
        let encrypted = f.cipher.encrypt_record(&patient("p1"), &context("p1")).await.unwrap();

        let rotated = f.manager.rotate_record(&encrypted, &context("p1"), None).await.unwrap();

        assert_eq!(key_ids(&encrypted), vec!["k1"; 3]);
        assert_eq!(key_ids(&rotated), vec!["k2"; 3]);
        assert_eq!(f.provider.rotate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(
            f.cipher.decrypt_record(&rotated, &context("p1")).await.unwrap(),
            f.cipher.decrypt_record(&encrypted, &context("p1")).await.unwrap()
        );
        // readers holding the old record keep working
        assert!(f.cipher.decrypt_record(&encrypted, &context("p1")).await.is_ok());
    }

    #[tokio::test]
    async fn hint_selects_target_master_key() {
        let f = fixture();
        let encrypted = f.cipher.encrypt_record(&patient("p1"), &context("p1")).await.unwrap();
        let next = f.provider.rotate_master_key("k1").await.unwrap();

        let rotated = f.manager.rotate_record(&encrypted, &context("p1"), Some(next.as_str())).await.unwrap();

        assert!(key_ids(&rotated).iter().all(|id| *id == next));
    }

    #[tokio::test]
    async fn wrong_context_fails_without_touching_input() {
        let f = fixture();
        let encrypted = f.cipher.encrypt_record(&patient("p1"), &context("p1")).await.unwrap();
        let before = encrypted.clone();
        let next = f.provider.rotate_master_key("k1").await.unwrap();

        let err = f.manager.rotate_record(&encrypted, &context("p2"), Some(next.as_str())).await.unwrap_err();

        assert!(matches!(
            err,
            RotationError::Field { source: EnvelopeError::Decryption(DecryptionError::ContextMismatch), .. }
        ));
        assert_eq!(encrypted, before);
    }

    #[tokio::test]
    async fn hint_naming_the_current_key_is_rejected() {
        let f = fixture();
        let encrypted = f.cipher.encrypt_record(&patient("p1"), &context("p1")).await.unwrap();
        let decrypts_before = f.provider.decrypt_calls.load(std::sync::atomic::Ordering::SeqCst);

        let err = f.manager.rotate_record(&encrypted, &context("p1"), Some("k1")).await.unwrap_err();

        assert!(matches!(err, RotationError::SameKey { ref key_id, .. } if key_id == "k1"));
        assert_eq!(f.provider.decrypt_calls.load(std::sync::atomic::Ordering::SeqCst), decrypts_before);

        let report = f
            .manager
            .rotate_batch(
                vec![RotationJob { record_id: "p1".into(), record: encrypted.clone(), context: context("p1") }],
                Some("k1"),
            )
            .await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].record, encrypted);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let f = fixture();
        let mut jobs = Vec::new();
        for id in ["p1", "p2", "p3"] {
            let record = f.cipher.encrypt_record(&patient(id), &context(id)).await.unwrap();
            jobs.push(RotationJob { record_id: id.into(), record, context: context(id) });
        }
        // p2 is submitted with the wrong context
        jobs[1].context = context("other");
        let p2_before = jobs[1].record.clone();

        let report = f.manager.with_concurrency(2).rotate_batch(jobs, None).await;

        assert!(!report.is_complete());
        assert_eq!(report.rotated.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].record_id, "p2");
        assert_eq!(report.failed[0].record, p2_before);
        let ids: Vec<_> = report.rotated.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, ["p1", "p3"]);
    }

    #[tokio::test]
    async fn provider_failure_during_master_rotation_is_reported() {
        let f = fixture();
        let encrypted = f.cipher.encrypt_record(&patient("p1"), &context("p1")).await.unwrap();
        f.provider.fail_next(1, KeyProviderError::Denied("rotation disabled".into()));

        let err = f.manager.rotate_record(&encrypted, &context("p1"), None).await.unwrap_err();

        assert!(matches!(err, RotationError::KeyProvider(KeyProviderError::Denied(_))));
    }
}
