//! Security primitives for handling key material in memory.

pub mod secret;

pub use secret::{constant_time_eq, SecretBytes};
