//! In-memory test doubles for the core ports
//!
//! Available to this crate's unit tests and, through the `test-utils`
//! feature, to downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use phivault_common::{AeadCipher, SealedData, SecretBytes};
use phivault_domain::{
    AuditFilter, AuditLogEntry, EncryptionContext, IncidentStatus, PageRequest, SecurityIncident,
};
use uuid::Uuid;

use crate::audit::ports::AuditStore;
use crate::envelope::ports::{GeneratedDataKey, KeyManagementProvider};
use crate::errors::{AuditQueryError, AuditWriteError, KeyProviderError, MonitorError};
use crate::monitor::ports::IncidentStore;

/// Key provider with in-memory master keys, call counters and injectable
/// failures.
///
/// Wrapped keys are `key_id_len ‖ key_id ‖ nonce ‖ ciphertext`, with the
/// canonical context as associated data.
pub struct FakeKeyProvider {
    keys: RwLock<HashMap<String, AeadCipher>>,
    successors: RwLock<HashMap<String, String>>,
    active: RwLock<String>,
    failures: Mutex<Vec<KeyProviderError>>,
    latency: Option<Duration>,
    /// Calls to `generate_data_key`, failed ones included
    pub generate_calls: AtomicUsize,
    /// Calls to `decrypt`, failed ones included
    pub decrypt_calls: AtomicUsize,
    /// Calls to `rotate_master_key`, failed ones included
    pub rotate_calls: AtomicUsize,
}

impl FakeKeyProvider {
    /// Provider holding one master key, `k1`
    pub fn new() -> Self {
        let provider = Self {
            keys: RwLock::new(HashMap::new()),
            successors: RwLock::new(HashMap::new()),
            active: RwLock::new("k1".to_string()),
            failures: Mutex::new(Vec::new()),
            latency: None,
            generate_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            rotate_calls: AtomicUsize::new(0),
        };
        provider.add_key("k1");
        provider
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `count` calls fail with `error`.
    pub fn fail_next(&self, count: usize, error: KeyProviderError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(count));
    }

    /// Master key that wraps new data keys
    pub fn active_key_id(&self) -> String {
        self.active.read().clone()
    }

    fn add_key(&self, key_id: &str) {
        let key = AeadCipher::generate_key();
        if let Ok(cipher) = AeadCipher::new(key.expose()) {
            self.keys.write().insert(key_id.to_string(), cipher);
        }
    }

    async fn enter(&self) -> Result<(), KeyProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }

    fn wrap(&self, key_id: &str, plaintext: &[u8], context: &EncryptionContext) -> Result<Vec<u8>, KeyProviderError> {
        let keys = self.keys.read();
        let cipher = keys.get(key_id).ok_or_else(|| KeyProviderError::UnknownKey(key_id.to_string()))?;
        let sealed = cipher
            .seal(plaintext, &context.canonical_bytes())
            .map_err(|e| KeyProviderError::Malformed(e.to_string()))?;

        let mut out = vec![key_id.len() as u8];
        out.extend_from_slice(key_id.as_bytes());
        out.extend_from_slice(&sealed.to_bytes());
        Ok(out)
    }
}

impl Default for FakeKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManagementProvider for FakeKeyProvider {
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<GeneratedDataKey, KeyProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let key_id = key_id.map_or_else(|| self.active_key_id(), str::to_string);
        let plaintext_key = AeadCipher::generate_key();
        let encrypted_key = self.wrap(&key_id, plaintext_key.expose(), context)?;
        Ok(GeneratedDataKey { plaintext_key, encrypted_key, key_id })
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        self.enter().await?;
        self.wrap(&self.active_key_id(), plaintext, &EncryptionContext::new())
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        expected: Option<&str>,
    ) -> Result<SecretBytes, KeyProviderError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let (&len, rest) = ciphertext.split_first().ok_or(KeyProviderError::InvalidCiphertext)?;
        let len = usize::from(len);
        if rest.len() < len {
            return Err(KeyProviderError::InvalidCiphertext);
        }
        let key_id = std::str::from_utf8(&rest[..len]).map_err(|_| KeyProviderError::InvalidCiphertext)?;
        let sealed = SealedData::from_bytes(&rest[len..]).map_err(|_| KeyProviderError::InvalidCiphertext)?;
        if let Some(expected) = expected.filter(|expected| *expected != key_id) {
            return Err(KeyProviderError::UnknownKey(expected.to_string()));
        }

        let keys = self.keys.read();
        let cipher = keys.get(key_id).ok_or_else(|| KeyProviderError::UnknownKey(key_id.to_string()))?;
        cipher
            .open(&sealed, &context.canonical_bytes())
            .map_err(|_| KeyProviderError::InvalidCiphertext)
    }

    async fn rotate_master_key(&self, old_key_id: &str) -> Result<String, KeyProviderError> {
        self.rotate_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        if !self.keys.read().contains_key(old_key_id) {
            return Err(KeyProviderError::UnknownKey(old_key_id.to_string()));
        }
        if let Some(next) = self.successors.read().get(old_key_id) {
            return Ok(next.clone());
        }

        let next = format!("k{}", self.keys.read().len() + 1);
        self.add_key(&next);
        self.successors.write().insert(old_key_id.to_string(), next.clone());
        *self.active.write() = next.clone();
        Ok(next)
    }
}

/// Audit store backed by a vector
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAuditStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far, in order
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }
}

/// Audit store that is always down
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingAuditStore;

#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn append(&self, _entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        Err(AuditWriteError::Unavailable("simulated outage".into()))
    }

    async fn query(
        &self,
        _filter: &AuditFilter,
        _page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        Err(AuditQueryError::Unavailable("simulated outage".into()))
    }
}

/// Audit store whose appends take `delay` before succeeding
pub struct SlowAuditStore {
    inner: MemoryAuditStore,
    delay: Duration,
}

impl SlowAuditStore {
    /// Store that waits `delay` before each append
    pub fn new(delay: Duration) -> Self {
        Self { inner: MemoryAuditStore::new(), delay }
    }
}

#[async_trait]
impl AuditStore for SlowAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditWriteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(entry).await
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        self.inner.query(filter, page).await
    }
}

/// Incident store backed by a vector
#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<Vec<SecurityIncident>>,
}

impl MemoryIncidentStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn create(&self, incident: &SecurityIncident) -> Result<(), MonitorError> {
        self.incidents.write().push(incident.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SecurityIncident>, MonitorError> {
        Ok(self.incidents.read().iter().find(|i| i.id == id).cloned())
    }

    async fn update(&self, incident: &SecurityIncident) -> Result<(), MonitorError> {
        let mut incidents = self.incidents.write();
        let slot = incidents
            .iter_mut()
            .find(|i| i.id == incident.id)
            .ok_or(MonitorError::IncidentNotFound(incident.id))?;
        *slot = incident.clone();
        Ok(())
    }

    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<SecurityIncident>, MonitorError> {
        Ok(self
            .incidents
            .read()
            .iter()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect())
    }
}
