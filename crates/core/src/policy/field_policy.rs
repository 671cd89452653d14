//! Field encryption policy and value coercion

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use phivault_common::crypto::decode_base64;
use phivault_common::SealedData;
use phivault_domain::{EncryptedField, FieldKind, FieldPolicyConfig, FieldPolicyEntry};
use serde_json::{Map, Value};

use crate::errors::{RecordError, ValidationError};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Immutable map of field name to policy entry, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPolicy {
    fields: BTreeMap<String, FieldPolicyEntry>,
    list_delimiter: String,
}

impl FieldPolicy {
    /// Policy built from the `field_policy` configuration section
    pub fn new(config: &FieldPolicyConfig) -> Self {
        Self { fields: config.fields.clone(), list_delimiter: config.list_delimiter.clone() }
    }

    /// Build from explicit entries. Plain entries are kept out of the
    /// protected set.
    pub fn from_entries<I, S>(entries: I, list_delimiter: &str) -> Self
    where
        I: IntoIterator<Item = (S, FieldPolicyEntry)>,
        S: Into<String>,
    {
        Self {
            fields: entries.into_iter().map(|(name, entry)| (name.into(), entry)).collect(),
            list_delimiter: list_delimiter.to_string(),
        }
    }

    /// `true` when `field` holds PHI and must be stored encrypted
    pub fn is_protected(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(|entry| entry.encrypted)
    }

    /// Coercion kind of a protected field
    pub fn kind(&self, field: &str) -> Option<FieldKind> {
        self.fields.get(field).filter(|entry| entry.encrypted).map(|entry| entry.kind)
    }

    /// Names of all protected fields, sorted
    pub fn protected_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter(|(_, entry)| entry.encrypted).map(|(name, _)| name.as_str())
    }

    /// Separator joining `delimited_list` items before encryption
    pub fn list_delimiter(&self) -> &str {
        &self.list_delimiter
    }

    /// Reject any record where a protected, non-null field is not a
    /// well-formed encrypted blob.
    ///
    /// Used as the write-time guard before persisting.
    pub fn validate_fully_encrypted(&self, record: &Map<String, Value>) -> Result<(), ValidationError> {
        for (name, value) in record {
            if value.is_null() || !self.is_protected(name) {
                continue;
            }
            match EncryptedField::from_value(value) {
                Some(blob) if has_valid_encoding(&blob) => {}
                Some(_) => return Err(ValidationError::MalformedBlob { field: name.clone() }),
                None if looks_like_blob(value) => {
                    return Err(ValidationError::MalformedBlob { field: name.clone() })
                }
                None => return Err(ValidationError::UnencryptedField { field: name.clone() }),
            }
        }
        Ok(())
    }

    /// Render a field value as the text that gets encrypted.
    pub(crate) fn coerce(&self, field: &str, kind: FieldKind, value: &Value) -> Result<String, RecordError> {
        let fail = |expected: &'static str| RecordError::Coercion { field: field.to_string(), expected };

        match kind {
            FieldKind::Raw => match value {
                Value::String(text) => Ok(text.clone()),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                _ => Err(fail("a scalar value")),
            },
            FieldKind::IsoDate => {
                let text = value.as_str().ok_or_else(|| fail("an ISO-8601 date"))?;
                if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
                    return Ok(date.format(DATE_FORMAT).to_string());
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|at| at.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true))
                    .map_err(|_| fail("an ISO-8601 date"))
            }
            FieldKind::DelimitedList => match value {
                Value::String(text) => Ok(text.clone()),
                Value::Array(items) => {
                    let mut parts = Vec::with_capacity(items.len());
                    for item in items {
                        let text = item.as_str().ok_or_else(|| fail("a list of strings"))?;
                        if text.contains(self.list_delimiter.as_str()) {
                            return Err(fail("list items without the delimiter"));
                        }
                        parts.push(text);
                    }
                    Ok(parts.join(self.list_delimiter.as_str()))
                }
                _ => Err(fail("a list of strings")),
            },
        }
    }

    /// Inverse of [`coerce`](Self::coerce) for decrypted text.
    pub(crate) fn restore(&self, kind: FieldKind, text: &str) -> Value {
        match kind {
            FieldKind::Raw | FieldKind::IsoDate => Value::String(text.to_string()),
            FieldKind::DelimitedList if text.is_empty() => Value::Array(Vec::new()),
            FieldKind::DelimitedList => Value::Array(
                text.split(self.list_delimiter.as_str()).map(|s| Value::String(s.to_string())).collect(),
            ),
        }
    }
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self::new(&FieldPolicyConfig::default())
    }
}

fn has_valid_encoding(blob: &EncryptedField) -> bool {
    SealedData::from_base64(&blob.encrypted_data).is_ok() && decode_base64(&blob.encrypted_key).is_ok()
}

fn looks_like_blob(value: &Value) -> bool {
    match value {
        Value::Object(object) => object.contains_key("encrypted_data"),
        Value::String(text) => {
            text.trim_start().starts_with('{') && text.contains("\"encrypted_data\"")
        }
        _ => false,
    }
}
