//! Shared cryptographic primitives used by the envelope engine and the local
//! key provider.

pub mod encryption;

pub use encryption::{decode_base64, encode_base64, AeadCipher, SealedData, NONCE_LEN};
