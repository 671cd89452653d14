#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use phivault_core::{MonitorEvent, RecordAccess};
use phivault_domain::{IncidentSeverity, PhiVaultConfig, ThresholdTier};
use phivault_infra::PhiVaultRuntime;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

/// The sample patient record used across the end-to-end tests.
pub fn patient_record() -> Map<String, Value> {
    as_map(json!({
        "first_name": "Ada",
        "last_name": "Lovelace",
        "ssn": "123-45-6789",
        "mrn": "MRN-0042",
        "status": "active",
        "visits": 3
    }))
}

pub fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn access(actor: &str, resource_id: &str) -> RecordAccess {
    RecordAccess::new(actor, "patient", resource_id)
}

/// Config whose single tier escalates on the `max_accesses + 1`th access.
pub fn escalating_config(max_accesses: usize) -> PhiVaultConfig {
    let mut config = PhiVaultConfig::default();
    config.monitor.tiers = vec![ThresholdTier {
        severity: IncidentSeverity::High,
        max_accesses,
        window_minutes: 60,
        auto_escalate: true,
        actions: Vec::new(),
    }];
    config
}

pub async fn runtime(config: PhiVaultConfig) -> PhiVaultRuntime {
    PhiVaultRuntime::build(config).await.expect("runtime should build")
}

/// Wait for the first monitor event matching `pred`.
pub async fn next_event<F>(events: &mut broadcast::Receiver<MonitorEvent>, pred: F) -> MonitorEvent
where
    F: Fn(&MonitorEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("monitor event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for monitor event")
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
