//! Key rotation: per-record and batch re-encryption under a new master key,
//! the atomic record slot readers and the rotator share, and the rotation
//! schedule.

mod manager;
mod schedule;
mod slot;

pub use manager::{RotatedRecord, RotationFailure, RotationJob, RotationManager, RotationReport};
pub use schedule::KeyRotationSchedule;
pub use slot::{RecordSlot, SlotUpdate};
