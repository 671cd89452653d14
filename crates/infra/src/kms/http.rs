//! HTTP client for a remote key-management service
//!
//! Speaks JSON over HTTPS; byte payloads travel as standard base64.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | generate data key | `POST /v1/data-keys` |
//! | encrypt | `POST /v1/encrypt` |
//! | decrypt | `POST /v1/decrypt` |
//! | rotate master key | `POST /v1/keys/{key_id}/rotate` |
//!
//! Each call is a single attempt. Retries and per-call timeouts belong to
//! the envelope engine, which classifies the errors returned here.

use std::time::Duration;

use async_trait::async_trait;
use phivault_common::crypto::{decode_base64, encode_base64};
use phivault_common::SecretBytes;
use phivault_core::envelope::ports::{GeneratedDataKey, KeyManagementProvider};
use phivault_core::KeyProviderError;
use phivault_domain::{EncryptionContext, KmsBackend, KmsSettings};
use reqwest::{Client as ReqwestClient, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::errors::http_transport_error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct DataKeyRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<&'a str>,
    encryption_context: &'a EncryptionContext,
}

#[derive(Deserialize)]
struct DataKeyResponse {
    plaintext_key: String,
    encrypted_key: String,
    key_id: String,
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: String,
    encryption_context: &'a EncryptionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Deserialize)]
struct RotateResponse {
    new_key_id: String,
}

/// Which call a non-success status belongs to; decides how 400/404 map.
#[derive(Debug, Clone, Copy)]
enum Call<'a> {
    GenerateDataKey(Option<&'a str>),
    Encrypt,
    Decrypt(Option<&'a str>),
    Rotate(&'a str),
}

/// Key provider backed by a remote KMS
#[derive(Clone)]
pub struct HttpKeyProvider {
    client: ReqwestClient,
    base_url: Url,
    api_key: Option<SecretBytes>,
}

impl std::fmt::Debug for HttpKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeyProvider")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpKeyProvider {
    /// Start configuring a client for the service at `base_url`
    pub fn builder(base_url: impl Into<String>) -> HttpKeyProviderBuilder {
        HttpKeyProviderBuilder::new(base_url)
    }

    /// Build from `kms` settings. The bearer token is read from the
    /// environment variable named by `api_key_env`.
    pub fn from_settings(settings: &KmsSettings) -> Result<Self, KeyProviderError> {
        let KmsBackend::Http { base_url, api_key_env } = &settings.backend else {
            return Err(KeyProviderError::Malformed("kms backend is not http".into()));
        };

        let mut builder = Self::builder(base_url.clone())
            .timeout(Duration::from_millis(settings.request_timeout_ms));
        if let Some(var) = api_key_env {
            let token = std::env::var(var).map_err(|_| {
                KeyProviderError::Denied(format!("environment variable {var} is not set"))
            })?;
            builder = builder.api_key(token);
        }
        builder.build()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, KeyProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| KeyProviderError::Malformed("kms base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B, R>(&self, call: Call<'_>, segments: &[&str], body: &B) -> Result<R, KeyProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = self.api_key.as_ref().and_then(SecretBytes::expose_str) {
            request = request.bearer_auth(token);
        }

        debug!(%url, "sending KMS request");
        let response = request.send().await.map_err(|err| {
            warn!(%url, error = %err, "KMS request failed");
            http_transport_error(&err)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "KMS returned an error status");
            return Err(map_status(status, call));
        }

        response.json::<R>().await.map_err(|err| http_transport_error(&err))
    }
}

fn map_status(status: StatusCode, call: Call<'_>) -> KeyProviderError {
    match status {
        s if s.is_server_error() => KeyProviderError::Unavailable(format!("kms returned {s}")),
        StatusCode::TOO_MANY_REQUESTS => KeyProviderError::Unavailable("kms is throttling requests".into()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            KeyProviderError::Denied(format!("kms returned {status}"))
        }
        StatusCode::NOT_FOUND => match call {
            Call::GenerateDataKey(Some(key_id)) | Call::Decrypt(Some(key_id)) | Call::Rotate(key_id) => {
                KeyProviderError::UnknownKey(key_id.to_string())
            }
            Call::Decrypt(None) => KeyProviderError::UnknownKey("referenced by ciphertext".into()),
            Call::GenerateDataKey(None) | Call::Encrypt => {
                KeyProviderError::UnknownKey("active".into())
            }
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY if matches!(call, Call::Decrypt(_)) => {
            KeyProviderError::InvalidCiphertext
        }
        s => KeyProviderError::Malformed(format!("kms rejected request with {s}")),
    }
}

fn decode(field: &str, encoded: &str) -> Result<Vec<u8>, KeyProviderError> {
    decode_base64(encoded).map_err(|_| KeyProviderError::Malformed(format!("{field} is not valid base64")))
}

#[async_trait]
impl KeyManagementProvider for HttpKeyProvider {
    #[instrument(skip_all, fields(key_id = key_id.unwrap_or("active")))]
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<GeneratedDataKey, KeyProviderError> {
        let body = DataKeyRequest { key_id, encryption_context: context };
        let response: DataKeyResponse =
            self.post(Call::GenerateDataKey(key_id), &["v1", "data-keys"], &body).await?;

        Ok(GeneratedDataKey {
            plaintext_key: SecretBytes::new(decode("plaintext_key", &response.plaintext_key)?),
            encrypted_key: decode("encrypted_key", &response.encrypted_key)?,
            key_id: response.key_id,
        })
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let body = EncryptRequest { plaintext: encode_base64(plaintext) };
        let response: EncryptResponse = self.post(Call::Encrypt, &["v1", "encrypt"], &body).await?;
        decode("ciphertext", &response.ciphertext)
    }

    #[instrument(skip_all, fields(key_id = key_id.unwrap_or("from ciphertext")))]
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        key_id: Option<&str>,
    ) -> Result<SecretBytes, KeyProviderError> {
        let body =
            DecryptRequest { ciphertext: encode_base64(ciphertext), encryption_context: context, key_id };
        let response: DecryptResponse = self.post(Call::Decrypt(key_id), &["v1", "decrypt"], &body).await?;
        decode("plaintext", &response.plaintext).map(SecretBytes::new)
    }

    #[instrument(skip(self))]
    async fn rotate_master_key(&self, old_key_id: &str) -> Result<String, KeyProviderError> {
        let response: RotateResponse = self
            .post(Call::Rotate(old_key_id), &["v1", "keys", old_key_id, "rotate"], &serde_json::json!({}))
            .await?;
        Ok(response.new_key_id)
    }
}

/// Builder for [`HttpKeyProvider`].
#[derive(Debug)]
pub struct HttpKeyProviderBuilder {
    base_url: String,
    timeout: Duration,
    api_key: Option<String>,
    user_agent: Option<String>,
}

impl HttpKeyProviderBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), timeout: DEFAULT_TIMEOUT, api_key: None, user_agent: None }
    }

    /// Transport-level timeout. Keep it at or above the engine's per-call
    /// timeout so the engine decides when a call has taken too long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bearer token sent with every request
    pub fn api_key(mut self, token: impl Into<String>) -> Self {
        self.api_key = Some(token.into());
        self
    }

    /// Override the `User-Agent` header
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Parse the base URL and build the underlying HTTP client
    pub fn build(self) -> Result<HttpKeyProvider, KeyProviderError> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| KeyProviderError::Malformed(format!("invalid kms base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(KeyProviderError::Malformed("kms base url cannot carry a path".into()));
        }

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder
            .build()
            .map_err(|e| KeyProviderError::Unavailable(format!("http client init failed: {e}")))?;

        Ok(HttpKeyProvider {
            client,
            base_url,
            api_key: self.api_key.map(|token| SecretBytes::new(token.into_bytes())),
        })
    }
}
