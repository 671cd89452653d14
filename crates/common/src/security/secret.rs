//! Secret byte buffer with automatic memory zeroization
//!
//! Plaintext data keys and decrypted field values pass through this type so
//! they are wiped on drop and never rendered by `Debug` or `Display`.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Byte buffer that zeroes memory on drop
///
/// # Security Note
/// `PartialEq` delegates to [`constant_time_eq`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes {
    inner: Vec<u8>,
}

impl SecretBytes {
    /// Take ownership of `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { inner: bytes }
    }

    /// Copy `bytes` into a new secret buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { inner: bytes.to_vec() }
    }

    /// Expose the inner bytes (use with caution)
    ///
    /// # Security Warning
    /// The exposed value should not be stored or logged.
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    /// Interpret the bytes as UTF-8.
    pub fn expose_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.inner).ok()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` for zero-length secrets
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.inner, &other.inner)
    }
}

impl Eq for SecretBytes {}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(***, len={})", self.inner.len())
    }
}

impl fmt::Display for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    //! Unit tests for security::secret.
    use super::*;

    /// Validates `SecretBytes` debug formatting.
    ///
    /// Assertions:
    /// - Ensures the rendered value never contains the secret bytes.
    #[test]
    fn test_secret_bytes_debug_is_redacted() {
        let s = SecretBytes::from_slice(b"hunter2");
        let debug_str = format!("{:?}", s);
        assert_eq!(debug_str, "SecretBytes(***, len=7)");
        assert!(!debug_str.contains("hunter2"));
        assert_eq!(format!("{}", s), "***");
    }

    /// Validates `SecretBytes::eq` behavior for equal and unequal buffers.
    ///
    /// Assertions:
    /// - Ensures equal buffers compare equal.
    /// - Ensures buffers of different length compare unequal.
    #[test]
    fn test_secret_bytes_constant_time_eq() {
        let a = SecretBytes::from_slice(b"key");
        let b = SecretBytes::from_slice(b"key");
        let c = SecretBytes::from_slice(b"longer key");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_expose_str_rejects_invalid_utf8() {
        assert_eq!(SecretBytes::from_slice(b"abc").expose_str(), Some("abc"));
        assert!(SecretBytes::new(vec![0xff, 0xfe]).expose_str().is_none());
    }
}
