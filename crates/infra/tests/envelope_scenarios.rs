//! Envelope engine against the in-process key provider

use std::sync::Arc;

use phivault_core::{DecryptionError, EnvelopeEngine, EnvelopeError, KeyManagementProvider};
use phivault_domain::EncryptionContext;
use phivault_infra::LocalKeyProvider;

fn engine() -> (Arc<LocalKeyProvider>, EnvelopeEngine) {
    let provider = Arc::new(LocalKeyProvider::new().expect("provider"));
    let engine = EnvelopeEngine::new(provider.clone());
    (provider, engine)
}

fn ssn() -> EncryptionContext {
    EncryptionContext::for_field("patient", "p1", "ssn")
}

#[tokio::test]
async fn ssn_decrypts_only_under_its_own_context() {
    let (_provider, engine) = engine();
    let field = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();

    let plaintext = engine.decrypt_field(&field, &ssn()).await.unwrap();
    assert_eq!(plaintext.as_str(), "123-45-6789");

    let mrn = EncryptionContext::for_field("patient", "p1", "mrn");
    let err = engine.decrypt_field(&field, &mrn).await.unwrap_err();
    assert!(matches!(err, EnvelopeError::Decryption(_)));
}

#[tokio::test]
async fn rewriting_the_stored_context_is_detected() {
    let (_provider, engine) = engine();
    let mut field = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();

    let mrn = EncryptionContext::for_field("patient", "p1", "mrn");
    field.encryption_context = mrn.clone();

    let err = engine.decrypt_field(&field, &mrn).await.unwrap_err();
    assert_eq!(err, EnvelopeError::Decryption(DecryptionError::AuthenticationFailed));
}

#[tokio::test]
async fn same_plaintext_encrypts_differently_each_time() {
    let (_provider, engine) = engine();
    let a = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();
    let b = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();

    assert_ne!(a.encrypted_data, b.encrypted_data);
    assert_ne!(a.encrypted_key, b.encrypted_key);
    assert_eq!(engine.decrypt_field(&a, &ssn()).await.unwrap().as_str(), "123-45-6789");
    assert_eq!(engine.decrypt_field(&b, &ssn()).await.unwrap().as_str(), "123-45-6789");
}

#[tokio::test]
async fn rotated_blob_changes_key_but_not_value() {
    let (provider, engine) = engine();
    let field = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();
    assert_eq!(field.key_id, "local-1");

    let rotated = engine.rotate(&field, None).await.unwrap();
    assert_ne!(rotated.key_id, field.key_id);
    assert_eq!(rotated.encryption_context, ssn());
    assert_eq!(engine.decrypt_field(&rotated, &ssn()).await.unwrap().as_str(), "123-45-6789");

    // the pre-rotation blob keeps working for readers that still hold it
    assert_eq!(engine.decrypt_field(&field, &ssn()).await.unwrap().as_str(), "123-45-6789");
    assert_eq!(provider.active_key_id(), rotated.key_id);
}

#[tokio::test]
async fn rotation_can_rebind_to_a_new_context() {
    let (_provider, engine) = engine();
    let field = engine.encrypt_field("MRN-0042", &ssn(), None).await.unwrap();
    let moved = EncryptionContext::for_field("patient", "p2", "ssn");

    let rotated = engine.rotate(&field, Some(&moved)).await.unwrap();

    assert_eq!(engine.decrypt_field(&rotated, &moved).await.unwrap().as_str(), "MRN-0042");
    assert!(engine.decrypt_field(&rotated, &ssn()).await.is_err());
}

#[tokio::test]
async fn stored_key_id_must_name_the_wrapping_key() {
    let (provider, engine) = engine();
    let mut field = engine.encrypt_field("123-45-6789", &ssn(), None).await.unwrap();
    provider.rotate_master_key("local-1").await.unwrap();

    field.key_id = "no-such-master-key".into();
    let err = engine.decrypt_field(&field, &ssn()).await.unwrap_err();
    assert_eq!(err, EnvelopeError::Decryption(DecryptionError::UnknownKey("no-such-master-key".into())));

    // a real id that did not wrap this data key is refused too
    field.key_id = "local-2".into();
    let err = engine.decrypt_field(&field, &ssn()).await.unwrap_err();
    assert_eq!(err, EnvelopeError::Decryption(DecryptionError::UnknownKey("local-2".into())));

    field.key_id = "local-1".into();
    assert_eq!(engine.decrypt_field(&field, &ssn()).await.unwrap().as_str(), "123-45-6789");
}
