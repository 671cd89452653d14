//! Shared record holder with whole-record replacement
//!
//! Readers clone an `Arc` snapshot and never see a partially rotated record.
//! Writers swap the pointer under a short write lock; no lock is held while
//! the provider is called.

use std::sync::Arc;

use parking_lot::RwLock;
use phivault_domain::EncryptionContext;
use serde_json::{Map, Value};

use super::manager::RotationManager;
use crate::errors::RotationError;

/// Outcome of a conditional replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    Replaced,
    /// Another writer replaced the record first; the update was discarded.
    Superseded,
}

/// Holds one record and swaps it as a whole, so a reader sees either
/// the old record or the rotated one.
#[derive(Debug, Default)]
pub struct RecordSlot {
    current: RwLock<Arc<Map<String, Value>>>,
}

impl RecordSlot {
    /// Slot holding `record`
    pub fn new(record: Map<String, Value>) -> Self {
        Self { current: RwLock::new(Arc::new(record)) }
    }

    /// Current record; cheap to clone and unaffected by later swaps.
    pub fn snapshot(&self) -> Arc<Map<String, Value>> {
        Arc::clone(&self.current.read())
    }

    /// Unconditional replacement (last writer wins).
    pub fn replace(&self, record: Map<String, Value>) {
        *self.current.write() = Arc::new(record);
    }

    /// Replace only if the slot still holds `expected`.
    pub fn replace_if_current(&self, expected: &Arc<Map<String, Value>>, record: Map<String, Value>) -> SlotUpdate {
        let mut current = self.current.write();
        if Arc::ptr_eq(&current, expected) {
            *current = Arc::new(record);
            SlotUpdate::Replaced
        } else {
            SlotUpdate::Superseded
        }
    }

    /// Rotate the current snapshot and install the result unless a
    /// concurrent writer got there first.
    pub async fn rotate(
        &self,
        manager: &RotationManager,
        context: &EncryptionContext,
        new_key_hint: Option<&str>,
    ) -> Result<SlotUpdate, RotationError> {
        let snapshot = self.snapshot();
        let rotated = manager.rotate_record(&snapshot, context, new_key_hint).await?;
        Ok(self.replace_if_current(&snapshot, rotated))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn snapshots_survive_replacement() {
        let slot = RecordSlot::new(record(json!({"v": 1})));
        let before = slot.snapshot();

        slot.replace(record(json!({"v": 2})));

        assert_eq!(before["v"], json!(1));
        assert_eq!(slot.snapshot()["v"], json!(2));
    }

    #[test]
    fn stale_conditional_replace_is_superseded() {
        let slot = RecordSlot::new(record(json!({"v": 1})));
        let stale = slot.snapshot();
        slot.replace(record(json!({"v": 2})));

        assert_eq!(slot.replace_if_current(&stale, record(json!({"v": 3}))), SlotUpdate::Superseded);
        assert_eq!(slot.snapshot()["v"], json!(2));

        let fresh = slot.snapshot();
        assert_eq!(slot.replace_if_current(&fresh, record(json!({"v": 4}))), SlotUpdate::Replaced);
        assert_eq!(slot.snapshot()["v"], json!(4));
    }
}
