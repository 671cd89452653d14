//! Caller-facing composition of the record cipher and the audit logger
//!
//! Every read or write of protected data is followed by an audit entry. By
//! default a failed audit write is reported to the logger's error sink and
//! the business call still succeeds; [`PhiRecordService::with_fail_closed`]
//! turns that failure into an error instead.

use phivault_domain::{AuditAction, EncryptionContext, RequestContext};
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::audit::AuditLogger;
use crate::errors::{RecordError, RecordServiceError};
use crate::policy::RecordCipher;

/// Who is touching which record, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAccess {
    /// Who is accessing
    pub actor_id: String,
    /// Kind of record, e.g. `patient`
    pub resource_type: String,
    /// Record identifier
    pub resource_id: String,
    /// Request metadata copied into the audit entry
    pub request: RequestContext,
}

impl RecordAccess {
    /// Access with empty request metadata
    pub fn new(actor_id: impl Into<String>, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            request: RequestContext::default(),
        }
    }

    /// Attach request metadata for the audit entry
    #[must_use]
    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    /// Record-level encryption context: `{resource_type, resource_id}`
    pub fn context(&self) -> EncryptionContext {
        EncryptionContext::for_resource(&self.resource_type, &self.resource_id)
    }
}

/// Encrypts and decrypts whole records and audits every access.
///
/// By default an audit write failure is reported to the error sink and the
/// operation still succeeds. With [`with_fail_closed`](Self::with_fail_closed)
/// the operation fails instead.
#[derive(Clone)]
pub struct PhiRecordService {
    cipher: RecordCipher,
    audit: AuditLogger,
    fail_closed: bool,
}

impl PhiRecordService {
    /// Fail-open service over `cipher` and `audit`
    pub fn new(cipher: RecordCipher, audit: AuditLogger) -> Self {
        Self { cipher, audit, fail_closed: false }
    }

    /// Fail record operations whose audit entry cannot be written
    pub fn with_fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    /// Record cipher used for reads and writes
    pub fn cipher(&self) -> &RecordCipher {
        &self.cipher
    }

    /// Audit logger every access is recorded with
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Encrypt `record` for persistence, check nothing protected is left in
    /// the clear, then audit a `modify`.
    #[instrument(skip_all, fields(actor_id = %access.actor_id, resource_id = %access.resource_id))]
    pub async fn write_record(
        &self,
        access: &RecordAccess,
        record: &Map<String, Value>,
    ) -> Result<Map<String, Value>, RecordServiceError> {
        let encrypted = self.cipher.encrypt_record(record, &access.context()).await?;
        self.cipher.validate_fully_encrypted(&encrypted).map_err(RecordError::from)?;

        let fields = self.cipher.accessed_fields(&encrypted);
        self.audit_access(access, AuditAction::Modify, &fields).await?;
        Ok(encrypted)
    }

    /// Decrypt a stored record and audit a `view` of its protected fields.
    #[instrument(skip_all, fields(actor_id = %access.actor_id, resource_id = %access.resource_id))]
    pub async fn read_record(
        &self,
        access: &RecordAccess,
        stored: &Map<String, Value>,
    ) -> Result<Map<String, Value>, RecordServiceError> {
        let decrypted = self.cipher.decrypt_record(stored, &access.context()).await?;

        let fields = self.cipher.accessed_fields(stored);
        self.audit_access(access, AuditAction::View, &fields).await?;
        Ok(decrypted)
    }

    /// Decrypt for export and audit an `export`.
    pub async fn export_record(
        &self,
        access: &RecordAccess,
        stored: &Map<String, Value>,
    ) -> Result<Map<String, Value>, RecordServiceError> {
        let decrypted = self.cipher.decrypt_record(stored, &access.context()).await?;

        let fields = self.cipher.accessed_fields(stored);
        self.audit_access(access, AuditAction::Export, &fields).await?;
        Ok(decrypted)
    }

    /// Audit a `delete`. Removing the record is the caller's job.
    pub async fn delete_record(
        &self,
        access: &RecordAccess,
        stored: &Map<String, Value>,
    ) -> Result<(), RecordServiceError> {
        let fields = self.cipher.accessed_fields(stored);
        self.audit_access(access, AuditAction::Delete, &fields).await
    }

    async fn audit_access(
        &self,
        access: &RecordAccess,
        action: AuditAction,
        fields: &[String],
    ) -> Result<(), RecordServiceError> {
        let outcome = self
            .audit
            .log_access(
                &access.actor_id,
                &access.resource_type,
                &access.resource_id,
                action,
                fields,
                &access.request,
            )
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(err) if self.fail_closed => Err(RecordServiceError::Audit(err)),
            Err(err) => {
                warn!(action = %action, error = %err, "proceeding without audit entry");
                Ok(())
            }
        }
    }
}
