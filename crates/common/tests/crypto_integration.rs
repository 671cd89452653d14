//! Integration tests for the crypto and security modules
//!
//! Validates that sealed payloads survive independent cipher instances, that
//! associated data binds ciphertext to its context, and that secrets stay
//! out of rendered output.

#![cfg(feature = "runtime")]

use phivault_common::crypto::{decode_base64, encode_base64, NONCE_LEN};
use phivault_common::{AeadCipher, SealedData, SecretBytes};

/// End-to-end seal/open across distinct cipher instances sharing a key.
#[test]
fn sealed_payload_opens_with_independent_instance() {
    let key = AeadCipher::generate_key();
    let sealer = AeadCipher::new(key.expose()).expect("failed to init sealer");
    let opener = AeadCipher::new(key.expose()).expect("failed to init opener with same key");

    let aad = br#"{"field":"ssn","record_type":"patient"}"#;
    let sealed = sealer.seal(b"123-45-6789", aad).expect("seal should succeed");
    let bytes = sealed.to_bytes();
    assert_eq!(&bytes[..NONCE_LEN], &sealed.nonce);

    let restored = SealedData::from_bytes(&bytes).expect("bytes should decode");
    let opened = opener.open(&restored, aad).expect("open should succeed");
    assert_eq!(opened.expose(), b"123-45-6789");
    assert_eq!(sealer.key_fingerprint(), opener.key_fingerprint());
}

/// A payload sealed for one field cannot be opened as another field.
#[test]
fn associated_data_binds_payload_to_context() {
    let key = AeadCipher::generate_key();
    let cipher = AeadCipher::new(key.expose()).expect("cipher init");

    let sealed = cipher.seal(b"MRN-001", br#"{"field":"ssn"}"#).expect("seal");
    let err = cipher.open(&sealed, br#"{"field":"mrn"}"#).expect_err("context swap must fail");
    assert!(!err.to_string().contains("MRN-001"), "errors must not echo plaintext");
}

/// A different key cannot open the payload.
#[test]
fn wrong_key_fails_authentication() {
    let sealer = AeadCipher::new(AeadCipher::generate_key().expose()).expect("cipher init");
    let other = AeadCipher::new(AeadCipher::generate_key().expose()).expect("cipher init");

    let sealed = sealer.seal(b"payload", b"").expect("seal");
    assert!(other.open(&sealed, b"").is_err());
}

#[test]
fn base64_helpers_reject_garbage() {
    assert!(decode_base64("not base64!!").is_err());
    assert_eq!(decode_base64(&encode_base64(b"abc")).expect("decode"), b"abc");
}

#[test]
fn generated_keys_are_secret_and_distinct() {
    let a = AeadCipher::generate_key();
    let b = AeadCipher::generate_key();

    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
    assert!(!format!("{a:?}").contains(&format!("{:?}", a.expose())));
    let _: &SecretBytes = &a;
}
