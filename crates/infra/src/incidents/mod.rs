//! Security incident storage

pub mod memory;

pub use memory::InMemoryIncidentStore;
