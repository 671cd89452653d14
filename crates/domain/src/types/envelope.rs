//! Envelope encryption data types
//!
//! [`EncryptedField`] is the persisted, self-describing blob for one
//! protected value. [`EncryptionContext`] is the set of attributes bound to
//! it; its canonical byte form is what both the field cipher and the key
//! provider authenticate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String attributes bound to an encryption operation.
///
/// Backed by a `BTreeMap` so iteration, serialization and
/// [`canonical_bytes`](Self::canonical_bytes) are independent of insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionContext(BTreeMap<String, String>);

impl EncryptionContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one field of one resource:
    /// `{resource_type, resource_id, field}`.
    pub fn for_field(resource_type: &str, resource_id: &str, field: &str) -> Self {
        Self::new()
            .with("resource_type", resource_type)
            .with("resource_id", resource_id)
            .with("field", field)
    }

    /// Context for a whole record: `{resource_type, resource_id}`.
    pub fn for_resource(resource_type: &str, resource_id: &str) -> Self {
        Self::new().with("resource_type", resource_type).with("resource_id", resource_id)
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Add or replace `key`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` for the empty context
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Canonical encoding: a compact JSON object with keys in sorted order.
    ///
    /// Two contexts are equal iff their canonical bytes are equal.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let object: Map<String, Value> =
            self.0.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        Value::Object(object).to_string().into_bytes()
    }
}

impl From<BTreeMap<String, String>> for EncryptionContext {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EncryptionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.canonical_bytes()))
    }
}

/// Persisted representation of one protected value.
///
/// ```json
/// {
///   "encrypted_data": "<base64 nonce || ciphertext>",
///   "encrypted_key": "<base64 wrapped data key>",
///   "key_id": "<master key id>",
///   "encryption_context": {"resource_type": "patient", "resource_id": "p1", "field": "ssn"},
///   "encrypted_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Base64 of nonce, ciphertext and tag
    pub encrypted_data: String,
    /// Base64 of the provider-wrapped data key
    pub encrypted_key: String,
    /// Master key that wrapped the data key
    pub key_id: String,
    /// Context bound into both ciphertexts
    pub encryption_context: EncryptionContext,
    /// When the field was sealed
    pub encrypted_at: DateTime<Utc>,
}

impl EncryptedField {
    /// Parse a record value as an encrypted blob.
    ///
    /// Accepts the JSON object form and, for stores that keep blobs as text
    /// columns, a string containing that object. Returns `None` for anything
    /// else, including legacy plaintext.
    pub fn from_value(value: &Value) -> Option<Self> {
        let field = match value {
            Value::Object(_) => serde_json::from_value::<Self>(value.clone()).ok()?,
            Value::String(text) if text.trim_start().starts_with('{') => {
                serde_json::from_str::<Self>(text).ok()?
            }
            _ => return None,
        };
        field.is_well_formed().then_some(field)
    }

    /// True when `value` parses as a well-formed blob.
    pub fn is_blob(value: &Value) -> bool {
        Self::from_value(value).is_some()
    }

    /// Render as the JSON object stored in a record.
    pub fn to_value(&self) -> Value {
        let context: Map<String, Value> = self
            .encryption_context
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut object = Map::new();
        object.insert("encrypted_data".into(), Value::String(self.encrypted_data.clone()));
        object.insert("encrypted_key".into(), Value::String(self.encrypted_key.clone()));
        object.insert("key_id".into(), Value::String(self.key_id.clone()));
        object.insert("encryption_context".into(), Value::Object(context));
        object.insert("encrypted_at".into(), Value::String(self.encrypted_at.to_rfc3339()));
        Value::Object(object)
    }

    fn is_well_formed(&self) -> bool {
        !self.encrypted_data.is_empty() && !self.encrypted_key.is_empty() && !self.key_id.is_empty()
    }
}

/// How a protected field's value is coerced to text before encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Strings as-is; other scalars via their JSON text
    #[default]
    Raw,
    /// Dates and timestamps as ISO-8601 strings
    IsoDate,
    /// Arrays of strings joined with the policy delimiter
    DelimitedList,
}

/// Policy for a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicyEntry {
    /// `false` keeps the field in the clear
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
    /// How the value is rendered to text before encryption
    #[serde(default)]
    pub kind: FieldKind,
}

fn default_encrypted() -> bool {
    true
}

impl FieldPolicyEntry {
    /// Encrypted field of `kind`
    pub const fn protected(kind: FieldKind) -> Self {
        Self { encrypted: true, kind }
    }

    /// Field stored in the clear
    pub const fn plain() -> Self {
        Self { encrypted: false, kind: FieldKind::Raw }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn sample_field() -> EncryptedField {
        EncryptedField {
            encrypted_data: "ZGF0YQ==".into(),
            encrypted_key: "a2V5".into(),
            key_id: "k1".into(),
            encryption_context: EncryptionContext::for_field("patient", "p1", "ssn"),
            encrypted_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_bytes_ignore_insertion_order() {
        let a = EncryptionContext::new().with("b", "2").with("a", "1");
        let b = EncryptionContext::new().with("a", "1").with("b", "2");

        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(a.canonical_bytes(), br#"{"a":"1","b":"2"}"#.to_vec());
    }

    #[test]
    fn canonical_bytes_distinguish_field_names() {
        let ssn = EncryptionContext::for_field("patient", "p1", "ssn");
        let mrn = EncryptionContext::for_field("patient", "p1", "mrn");
        assert_ne!(ssn.canonical_bytes(), mrn.canonical_bytes());
    }

    #[test]
    fn encrypted_field_parses_object_and_string_forms() {
        let field = sample_field();
        let value = field.to_value();

        assert_eq!(EncryptedField::from_value(&value), Some(field.clone()));
        let as_text = Value::String(value.to_string());
        assert_eq!(EncryptedField::from_value(&as_text), Some(field));
    }

    #[test]
    fn plaintext_and_partial_objects_are_not_blobs() {
        assert!(!EncryptedField::is_blob(&json!("123-45-6789")));
        assert!(!EncryptedField::is_blob(&json!({"encrypted_data": "abc"})));
        assert!(!EncryptedField::is_blob(&json!(42)));

        let mut empty_key = sample_field().to_value();
        empty_key["key_id"] = json!("");
        assert!(!EncryptedField::is_blob(&empty_key));
    }

    #[test]
    fn field_policy_entry_defaults_to_encrypted_raw() {
        let entry: FieldPolicyEntry = serde_json::from_value(json!({})).unwrap();
        assert_eq!(entry, FieldPolicyEntry::protected(FieldKind::Raw));
        let list: FieldPolicyEntry =
            serde_json::from_value(json!({"kind": "delimited_list"})).unwrap();
        assert_eq!(list.kind, FieldKind::DelimitedList);
    }
}
