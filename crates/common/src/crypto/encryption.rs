//! AES-256-GCM primitives with associated data.
//!
//! - [`AeadCipher`]: seals and opens byte payloads under a 32-byte key,
//!   binding caller-supplied associated data (AAD) into the tag
//! - [`SealedData`]: nonce plus ciphertext, with a compact `nonce || ct`
//!   byte encoding
//!
//! Every seal draws a fresh 96-bit nonce from the OS RNG, so sealing the same
//! plaintext twice never yields the same bytes.
//!
//! ```rust
//! use phivault_common::crypto::AeadCipher;
//!
//! let key = AeadCipher::generate_key();
//! let cipher = AeadCipher::new(key.expose())?;
//!
//! let sealed = cipher.seal(b"123-45-6789", b"{\"field\":\"ssn\"}")?;
//! let opened = cipher.open(&sealed, b"{\"field\":\"ssn\"}")?;
//! assert_eq!(opened.expose(), b"123-45-6789");
//! assert!(cipher.open(&sealed, b"{\"field\":\"mrn\"}").is_err());
//! # Ok::<(), phivault_common::error::CommonError>(())
//! ```

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{CommonError, CommonResult};
use crate::security::SecretBytes;

/// Length in bytes of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// Length in bytes of the GCM nonce.
pub const NONCE_LEN: usize = 12;

/// Length in bytes of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Sealed payload produced by [`AeadCipher::seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedData {
    /// Random per-message nonce
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext followed by the 16-byte tag
    pub ciphertext: Vec<u8>,
}

impl SealedData {
    /// Encode as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode from `nonce || ciphertext`.
    ///
    /// Anything shorter than a nonce plus a tag cannot be a sealed payload.
    pub fn from_bytes(bytes: &[u8]) -> CommonResult<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CommonError::serialization_format(
                "AES-256-GCM",
                format!("sealed payload too short ({} bytes)", bytes.len()),
            ));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| {
            CommonError::serialization_format("AES-256-GCM", "nonce must be 12 bytes")
        })?;

        Ok(Self { nonce, ciphertext: ciphertext.to_vec() })
    }

    /// Encode as standard base64 of `nonce || ciphertext`.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.to_bytes())
    }

    /// Decode from standard base64 of `nonce || ciphertext`.
    pub fn from_base64(encoded: &str) -> CommonResult<Self> {
        Self::from_bytes(&decode_base64(encoded)?)
    }
}

/// AES-256-GCM cipher bound to a single key.
pub struct AeadCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher")
            .field("key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl AeadCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> CommonResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CommonError::crypto(
                "cipher_init",
                format!("key must be exactly {KEY_LEN} bytes"),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CommonError::crypto("cipher_init", e.to_string()))?;

        Ok(Self { cipher, fingerprint: fingerprint(key) })
    }

    /// Generate a random 32-byte symmetric key.
    pub fn generate_key() -> SecretBytes {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        SecretBytes::new(key)
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CommonResult<SealedData> {
        let nonce = Self::generate_nonce();
        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CommonError::crypto("seal", "encryption failed"))?;

        Ok(SealedData { nonce, ciphertext })
    }

    /// Decrypt `sealed`, failing unless `aad` matches the value used to seal.
    pub fn open(&self, sealed: &SealedData, aad: &[u8]) -> CommonResult<SecretBytes> {
        self.cipher
            .decrypt(&Nonce::from(sealed.nonce), Payload { msg: sealed.ciphertext.as_ref(), aad })
            .map(SecretBytes::new)
            .map_err(|_| CommonError::crypto("open", "authentication failed"))
    }

    /// Short, non-reversible identifier of the key, safe to log.
    pub fn key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

/// Standard base64 encoding used for blobs at rest and on the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(encoded: &str) -> CommonResult<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| CommonError::serialization_format("base64", e.to_string()))
}

fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    BASE64.encode(&digest[..8])
}
