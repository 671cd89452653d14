//! Envelope encryption: per-record data keys wrapped by a key-management
//! provider, field ciphertext sealed locally with AES-256-GCM.

mod data_key;
mod engine;
pub mod ports;

pub use data_key::DataKey;
pub use engine::{EnvelopeEngine, DEFAULT_CALL_TIMEOUT};
