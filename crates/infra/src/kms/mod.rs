//! Key-management provider implementations
//!
//! - [`LocalKeyProvider`]: master keys held in process memory, for
//!   development, tests and single-node deployments
//! - [`HttpKeyProvider`]: client for a remote KMS speaking JSON over HTTPS

pub mod http;
pub mod local;

pub use http::{HttpKeyProvider, HttpKeyProviderBuilder};
pub use local::LocalKeyProvider;
