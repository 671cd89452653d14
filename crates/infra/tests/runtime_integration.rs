//! End-to-end tests through a fully wired runtime
//!
//! Uses the in-process key provider and in-memory stores unless a test
//! says otherwise.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use phivault_core::testing::{FailingAuditStore, FakeKeyProvider};
use phivault_core::{
    ChannelErrorSink, DecryptionError, EnvelopeError, MonitorEvent, RecordError,
    RecordServiceError, RotationJob,
};
use phivault_domain::{
    AuditAction, AuditFilter, DateRange, EncryptedField, IncidentStatus, MonitoredSubject,
    PhiVaultConfig, SubjectState,
};
use phivault_infra::{InfraError, PhiVaultRuntime};
use serde_json::json;
use support::{access, escalating_config, next_event, patient_record, runtime};

#[tokio::test]
async fn protected_fields_round_trip_and_plain_fields_pass_through() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let who = access("dr-a", "p1");
    let plain = patient_record();

    let stored = runtime.records().write_record(&who, &plain).await.unwrap();

    for field in ["first_name", "last_name", "ssn", "mrn"] {
        let blob = EncryptedField::from_value(&stored[field]).expect("field should be encrypted");
        assert_eq!(blob.key_id, "local-1");
        assert!(!blob.encrypted_data.contains("123-45-6789"));
    }
    assert_eq!(stored["status"], json!("active"));
    assert_eq!(stored["visits"], json!(3));
    runtime.policy().validate_fully_encrypted(&stored).unwrap();

    let read = runtime.records().read_record(&who, &stored).await.unwrap();
    assert_eq!(read, plain);

    runtime.shutdown().await;
}

#[tokio::test]
async fn blobs_are_bound_to_their_record() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let stored = runtime.records().write_record(&access("dr-a", "p1"), &patient_record()).await.unwrap();

    let err = runtime.records().read_record(&access("dr-a", "p2"), &stored).await.unwrap_err();
    match err {
        RecordServiceError::Record(RecordError::Envelope { source, .. }) => {
            assert_eq!(source, EnvelopeError::Decryption(DecryptionError::ContextMismatch));
        }
        other => panic!("unexpected error: {other}"),
    }

    // swapping a blob between records is caught by the provider too
    let other = runtime.records().write_record(&access("dr-a", "p2"), &patient_record()).await.unwrap();
    let mut forged = EncryptedField::from_value(&other["ssn"]).unwrap();
    let original = EncryptedField::from_value(&stored["ssn"]).unwrap();
    forged.encryption_context = original.encryption_context.clone();
    let err = runtime.engine().decrypt_field(&forged, &original.encryption_context).await.unwrap_err();
    assert_eq!(err, EnvelopeError::Decryption(DecryptionError::AuthenticationFailed));

    runtime.shutdown().await;
}

#[tokio::test]
async fn encrypting_the_same_record_twice_differs() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let who = access("dr-a", "p1");

    let first = runtime.records().write_record(&who, &patient_record()).await.unwrap();
    let second = runtime.records().write_record(&who, &patient_record()).await.unwrap();

    let a = EncryptedField::from_value(&first["ssn"]).unwrap();
    let b = EncryptedField::from_value(&second["ssn"]).unwrap();
    assert_ne!(a.encrypted_data, b.encrypted_data);
    assert_ne!(a.encrypted_key, b.encrypted_key);

    runtime.shutdown().await;
}

#[tokio::test]
async fn unencrypted_protected_field_fails_validation() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let mut stored = runtime.records().write_record(&access("dr-a", "p1"), &patient_record()).await.unwrap();
    stored.insert("mrn".into(), json!("MRN-0042"));

    assert!(runtime.policy().validate_fully_encrypted(&stored).is_err());
    runtime.shutdown().await;
}

#[tokio::test]
async fn rotation_keeps_values_and_moves_to_the_successor_key() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let who = access("dr-a", "p1");
    let stored = runtime.records().write_record(&who, &patient_record()).await.unwrap();

    let rotated = runtime.rotation().rotate_record(&stored, &who.context(), None).await.unwrap();

    for field in ["first_name", "last_name", "ssn", "mrn"] {
        let before = EncryptedField::from_value(&stored[field]).unwrap();
        let after = EncryptedField::from_value(&rotated[field]).unwrap();
        assert_eq!(before.key_id, "local-1");
        assert_eq!(after.key_id, "local-2");
        assert_ne!(before.encrypted_data, after.encrypted_data);
    }

    // both the old and the rotated record still decrypt
    assert_eq!(runtime.records().read_record(&who, &rotated).await.unwrap(), patient_record());
    assert_eq!(runtime.records().read_record(&who, &stored).await.unwrap(), patient_record());

    runtime.shutdown().await;
}

#[tokio::test]
async fn batch_rotation_isolates_failures() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let good = access("dr-a", "p1");
    let stored = runtime.records().write_record(&good, &patient_record()).await.unwrap();

    let jobs = vec![
        RotationJob { record_id: "p1".into(), record: stored.clone(), context: good.context() },
        // wrong context: every protected field fails to open
        RotationJob { record_id: "p9".into(), record: stored.clone(), context: access("dr-a", "p9").context() },
    ];
    let report = runtime.rotation().rotate_batch(jobs, None).await;

    assert_eq!(report.rotated.len(), 1);
    assert_eq!(report.rotated[0].record_id, "p1");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].record_id, "p9");
    assert_eq!(report.failed[0].record, stored);
    assert!(!report.is_complete());

    runtime.shutdown().await;
}

#[tokio::test]
async fn named_key_rotation_with_fake_provider() {
    let runtime = PhiVaultRuntime::builder(PhiVaultConfig::default())
        .key_provider(Arc::new(FakeKeyProvider::new()))
        .build()
        .await
        .unwrap();
    let who = access("dr-a", "p1");
    let stored = runtime.records().write_record(&who, &patient_record()).await.unwrap();
    assert_eq!(EncryptedField::from_value(&stored["ssn"]).unwrap().key_id, "k1");

    let rotated = runtime.rotation().rotate_record(&stored, &who.context(), None).await.unwrap();
    assert_eq!(EncryptedField::from_value(&rotated["ssn"]).unwrap().key_id, "k2");
    assert_eq!(runtime.records().read_record(&who, &rotated).await.unwrap()["ssn"], json!("123-45-6789"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn every_access_is_audited_in_order() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    let who = access("dr-a", "p1");
    let stored = runtime.records().write_record(&who, &patient_record()).await.unwrap();
    runtime.records().read_record(&who, &stored).await.unwrap();
    runtime.records().export_record(&who, &stored).await.unwrap();
    runtime.records().delete_record(&who, &stored).await.unwrap();

    let entries = runtime.audit().query_all(AuditFilter::new().actor("dr-a")).await.unwrap();
    let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Modify, AuditAction::View, AuditAction::Export, AuditAction::Delete]
    );
    assert!(entries.iter().all(|e| e.resource_id == "p1"));
    assert!(entries[1].accessed_fields.contains(&"ssn".to_string()));
    assert!(!entries[1].accessed_fields.contains(&"status".to_string()));

    // queries are repeatable
    let again: Vec<_> = runtime
        .audit()
        .query(AuditFilter::new().actor("dr-a"))
        .map(|entry| entry.unwrap().id)
        .collect()
        .await;
    assert_eq!(again, entries.iter().map(|e| e.id).collect::<Vec<_>>());

    runtime.shutdown().await;
}

#[tokio::test]
async fn audit_outage_does_not_block_record_access() {
    let (sink, mut failures) = ChannelErrorSink::new(8);
    let runtime = PhiVaultRuntime::builder(PhiVaultConfig::default())
        .audit_store(Arc::new(FailingAuditStore))
        .error_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    let who = access("dr-a", "p1");
    let stored = runtime.records().write_record(&who, &patient_record()).await.unwrap();
    let read = runtime.records().read_record(&who, &stored).await.unwrap();
    assert_eq!(read, patient_record());

    let first = failures.recv().await.unwrap();
    let second = failures.recv().await.unwrap();
    assert_eq!(first.action, AuditAction::Modify);
    assert_eq!(second.action, AuditAction::View);
    assert_eq!(second.resource_id, "p1");

    runtime.shutdown().await;
}

#[tokio::test]
async fn fail_closed_runtime_rejects_unaudited_access() {
    let runtime = PhiVaultRuntime::builder(PhiVaultConfig::default())
        .audit_store(Arc::new(FailingAuditStore))
        .fail_closed(true)
        .build()
        .await
        .unwrap();

    let err = runtime.records().write_record(&access("dr-a", "p1"), &patient_record()).await.unwrap_err();
    assert!(matches!(err, RecordServiceError::Audit(_)));

    runtime.shutdown().await;
}

#[tokio::test]
async fn excessive_access_opens_exactly_one_incident() {
    let runtime = runtime(escalating_config(3)).await;
    let mut events = runtime.monitor().subscribe_events();
    let subject = MonitoredSubject::Actor("dr-a".into());

    let stored = runtime.records().write_record(&access("dr-a", "p1"), &patient_record()).await.unwrap();
    for _ in 0..3 {
        runtime.records().read_record(&access("dr-a", "p1"), &stored).await.unwrap();
    }

    let event = next_event(&mut events, |e| matches!(e, MonitorEvent::Escalated { .. })).await;
    let MonitorEvent::Escalated { subject: escalated, incident_id, .. } = event else {
        unreachable!("filtered above");
    };
    assert_eq!(escalated, subject);

    // further accesses while escalated do not open another incident
    for _ in 0..3 {
        runtime.records().read_record(&access("dr-a", "p1"), &stored).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let open = runtime.monitor().list_incidents(Some(IncidentStatus::Open)).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, incident_id);
    assert_eq!(open[0].affected_resources, vec!["p1".to_string()]);
    assert_eq!(runtime.monitor().subject_state(&subject), SubjectState::Escalated);

    // resolving returns the subject to normal
    runtime.monitor().update_incident(incident_id, IncidentStatus::Investigating, None).await.unwrap();
    runtime
        .monitor()
        .update_incident(incident_id, IncidentStatus::Resolved, Some("approved research export".into()))
        .await
        .unwrap();
    assert_eq!(runtime.monitor().subject_state(&subject), SubjectState::Normal);

    runtime.shutdown().await;
}

#[tokio::test]
async fn report_covers_period_and_open_incidents() {
    let runtime = runtime(escalating_config(2)).await;
    let mut events = runtime.monitor().subscribe_events();
    let start = Utc::now() - chrono::Duration::seconds(1);

    let stored = runtime.records().write_record(&access("dr-a", "p1"), &patient_record()).await.unwrap();
    runtime.records().read_record(&access("dr-a", "p1"), &stored).await.unwrap();
    runtime.records().read_record(&access("dr-b", "p1"), &stored).await.unwrap();
    runtime.records().export_record(&access("dr-a", "p1"), &stored).await.unwrap();
    next_event(&mut events, |e| matches!(e, MonitorEvent::Escalated { .. })).await;

    let period = DateRange::new(start, Utc::now() + chrono::Duration::seconds(1)).unwrap();
    let report = runtime.audit().generate_report(period, None, runtime.monitor()).await.unwrap();

    assert_eq!(report.total_events, 4);
    assert_eq!(report.unique_actors, 2);
    assert_eq!(report.by_action.get(&AuditAction::View), Some(&2));
    assert_eq!(report.by_resource_type.get("patient"), Some(&4));
    assert_eq!(report.open_incidents.len(), 1);
    assert_eq!(report.access_patterns.len(), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_monitor() {
    let runtime = runtime(PhiVaultConfig::default()).await;
    assert!(runtime.is_running());
    runtime.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_a_config_error() {
    let mut config = PhiVaultConfig::default();
    config.audit.page_size = 0;
    let err = PhiVaultRuntime::build(config).await.unwrap_err();
    assert!(matches!(err, InfraError::Config(_)));
}
