//! In-process key-management provider
//!
//! Data keys are wrapped with AES-256-GCM under an in-memory master key, with
//! the canonical encryption context as associated data. The wrapped key is
//! self-describing:
//!
//! ```text
//! version (1) ‖ key_id_len (1) ‖ key_id ‖ nonce (12) ‖ ciphertext+tag
//! ```
//!
//! so `decrypt` can locate the master key without any side table. Retired
//! master keys are kept and still unwrap; they no longer wrap new data keys.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use phivault_common::{AeadCipher, SealedData, SecretBytes};
use phivault_core::envelope::ports::{GeneratedDataKey, KeyManagementProvider};
use phivault_core::KeyProviderError;
use phivault_domain::EncryptionContext;
use tracing::{debug, info, instrument, warn};

const WRAP_VERSION: u8 = 1;
const KEY_ID_PREFIX: &str = "local";

struct KeyRing {
    keys: HashMap<String, AeadCipher>,
    successors: HashMap<String, String>,
    active: String,
    serial: u64,
}

impl KeyRing {
    fn mint(&mut self) -> Result<String, KeyProviderError> {
        self.serial += 1;
        let key_id = format!("{KEY_ID_PREFIX}-{}", self.serial);
        let material = AeadCipher::generate_key();
        let cipher = AeadCipher::new(material.expose())
            .map_err(|e| KeyProviderError::Unavailable(format!("master key generation failed: {e}")))?;
        self.keys.insert(key_id.clone(), cipher);
        Ok(key_id)
    }

    /// Follow the successor chain of a retired key to the key that is
    /// currently live.
    fn current_successor(&self, key_id: &str) -> Option<String> {
        let mut current = self.successors.get(key_id)?;
        while let Some(next) = self.successors.get(current) {
            current = next;
        }
        Some(current.clone())
    }

    fn is_retired(&self, key_id: &str) -> bool {
        self.successors.contains_key(key_id)
    }
}

/// Key provider with master keys held in memory
pub struct LocalKeyProvider {
    ring: RwLock<KeyRing>,
}

impl std::fmt::Debug for LocalKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("LocalKeyProvider")
            .field("active", &ring.active)
            .field("keys", &ring.keys.len())
            .finish()
    }
}

impl LocalKeyProvider {
    /// Create a provider with one freshly generated active master key.
    pub fn new() -> Result<Self, KeyProviderError> {
        let mut ring = KeyRing {
            keys: HashMap::new(),
            successors: HashMap::new(),
            active: String::new(),
            serial: 0,
        };
        ring.active = ring.mint()?;
        info!(key_id = %ring.active, "local key provider initialised");
        Ok(Self { ring: RwLock::new(ring) })
    }

    /// Create a provider whose active master key is the given 32-byte key.
    ///
    /// Used to reopen data wrapped by an earlier process.
    pub fn with_master_key(key_id: impl Into<String>, key: &SecretBytes) -> Result<Self, KeyProviderError> {
        let key_id = key_id.into();
        if key_id.is_empty() || key_id.len() > usize::from(u8::MAX) {
            return Err(KeyProviderError::Malformed("key id must be 1-255 bytes".into()));
        }
        let cipher = AeadCipher::new(key.expose())
            .map_err(|e| KeyProviderError::Malformed(format!("invalid master key: {e}")))?;

        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), cipher);
        let ring = KeyRing { keys, successors: HashMap::new(), active: key_id, serial: 0 };
        Ok(Self { ring: RwLock::new(ring) })
    }

    /// Master key that wraps new data keys
    pub fn active_key_id(&self) -> String {
        self.ring.read().active.clone()
    }

    /// Every master key id known to the provider, retired ones included.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ring.read().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn wrap(
        ring: &KeyRing,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, KeyProviderError> {
        let cipher = ring.keys.get(key_id).ok_or_else(|| KeyProviderError::UnknownKey(key_id.to_string()))?;
        let id_len = u8::try_from(key_id.len())
            .map_err(|_| KeyProviderError::Malformed("key id longer than 255 bytes".into()))?;
        let sealed = cipher
            .seal(plaintext, &context.canonical_bytes())
            .map_err(|e| KeyProviderError::Unavailable(format!("wrap failed: {e}")))?;

        let mut out = Vec::with_capacity(2 + key_id.len() + plaintext.len() + 28);
        out.push(WRAP_VERSION);
        out.push(id_len);
        out.extend_from_slice(key_id.as_bytes());
        out.extend_from_slice(&sealed.to_bytes());
        Ok(out)
    }

    /// Split a wrapped key into its master key id and sealed payload.
    fn parse(wrapped: &[u8]) -> Result<(&str, SealedData), KeyProviderError> {
        let [version, id_len, rest @ ..] = wrapped else {
            return Err(KeyProviderError::InvalidCiphertext);
        };
        if *version != WRAP_VERSION {
            return Err(KeyProviderError::InvalidCiphertext);
        }
        let id_len = usize::from(*id_len);
        if rest.len() < id_len {
            return Err(KeyProviderError::InvalidCiphertext);
        }
        let (id_bytes, sealed) = rest.split_at(id_len);
        let key_id = std::str::from_utf8(id_bytes).map_err(|_| KeyProviderError::InvalidCiphertext)?;
        let sealed = SealedData::from_bytes(sealed).map_err(|_| KeyProviderError::InvalidCiphertext)?;
        Ok((key_id, sealed))
    }
}

#[async_trait]
impl KeyManagementProvider for LocalKeyProvider {
    #[instrument(skip_all, fields(key_id = key_id.unwrap_or("active")))]
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<GeneratedDataKey, KeyProviderError> {
        let ring = self.ring.read();
        let key_id = key_id.map_or_else(|| ring.active.clone(), str::to_string);
        if ring.is_retired(&key_id) {
            return Err(KeyProviderError::Denied(format!("master key '{key_id}' is retired")));
        }

        let plaintext_key = AeadCipher::generate_key();
        let encrypted_key = Self::wrap(&ring, &key_id, plaintext_key.expose(), context)?;
        debug!(key_id = %key_id, "data key issued");
        Ok(GeneratedDataKey { plaintext_key, encrypted_key, key_id })
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let ring = self.ring.read();
        Self::wrap(&ring, &ring.active, plaintext, &EncryptionContext::new())
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        expected: Option<&str>,
    ) -> Result<SecretBytes, KeyProviderError> {
        let (key_id, sealed) = Self::parse(ciphertext)?;
        if let Some(expected) = expected.filter(|expected| *expected != key_id) {
            warn!(expected, wrapped_by = key_id, "wrapped key names a different master key");
            return Err(KeyProviderError::UnknownKey(expected.to_string()));
        }
        let ring = self.ring.read();
        let cipher = ring.keys.get(key_id).ok_or_else(|| KeyProviderError::UnknownKey(key_id.to_string()))?;
        cipher
            .open(&sealed, &context.canonical_bytes())
            .map_err(|_| KeyProviderError::InvalidCiphertext)
    }

    #[instrument(skip(self))]
    async fn rotate_master_key(&self, old_key_id: &str) -> Result<String, KeyProviderError> {
        let mut ring = self.ring.write();
        if !ring.keys.contains_key(old_key_id) {
            return Err(KeyProviderError::UnknownKey(old_key_id.to_string()));
        }
        if let Some(current) = ring.current_successor(old_key_id) {
            debug!(successor = %current, "master key already retired");
            return Ok(current);
        }

        let next = ring.mint()?;
        ring.successors.insert(old_key_id.to_string(), next.clone());
        if ring.active == old_key_id {
            ring.active = next.clone();
        }
        info!(old_key_id, new_key_id = %next, "master key rotated");
        Ok(next)
    }
}
