//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! building a runtime from it.

use std::io::Write;

use phivault_domain::{AuditBackend, FieldKind, KmsBackend};
use phivault_infra::{config, PhiVaultRuntime};
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_json_file() {
    let json_content = r#"{
        "field_policy": {
            "list_delimiter": "|",
            "fields": {
                "ssn": {"kind": "raw"},
                "allergies": {"kind": "delimited_list"}
            }
        },
        "audit": {
            "backend": {"type": "sqlite", "path": "/tmp/phivault-audit.db"},
            "page_size": 50
        },
        "kms": {
            "backend": {"type": "http", "base_url": "https://kms.example.test", "api_key_env": "KMS_TOKEN"},
            "max_attempts": 2
        }
    }"#;

    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(json_content.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension("json");
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

    let result = config::load_from_file(Some(path.clone()));
    std::fs::remove_file(&path).ok();

    let config = result.expect("Failed to load config from JSON file");
    assert_eq!(config.field_policy.list_delimiter, "|");
    assert_eq!(config.field_policy.fields.len(), 2);
    assert_eq!(config.field_policy.fields["allergies"].kind, FieldKind::DelimitedList);
    assert_eq!(config.audit.backend, AuditBackend::Sqlite { path: "/tmp/phivault-audit.db".into() });
    assert_eq!(config.audit.page_size, 50);
    assert_eq!(
        config.kms.backend,
        KmsBackend::Http {
            base_url: "https://kms.example.test".into(),
            api_key_env: Some("KMS_TOKEN".into()),
        }
    );
    assert_eq!(config.kms.max_attempts, 2);
    assert_eq!(config.kms.request_timeout_ms, 5_000, "unset keys keep their defaults");
}

#[test]
fn test_load_config_from_toml_file() {
    let toml_content = r#"
[logging]
level = "phivault_core=debug,info"
json = true

[audit.backend]
type = "jsonl"
path = "/var/lib/phivault/audit.jsonl"

[[monitor.tiers]]
severity = "critical"
max_accesses = 10
window_minutes = 1
auto_escalate = true
actions = ["export", "delete"]
"#;

    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(toml_content.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension("toml");
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");

    let result = config::load_from_file(Some(path.clone()));
    std::fs::remove_file(&path).ok();

    let config = result.expect("Failed to load config from TOML file");
    assert!(config.logging.json);
    assert_eq!(config.monitor.tiers.len(), 1);
    assert_eq!(config.monitor.tiers[0].actions.len(), 2);
    assert_eq!(config.monitor.channel_capacity, 1024);
    assert!(matches!(config.audit.backend, AuditBackend::Jsonl { .. }));
}

#[tokio::test]
async fn test_runtime_from_loaded_file_uses_jsonl_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let audit_path = dir.path().join("logs").join("audit.jsonl");
    let config_path = dir.path().join("phivault.toml");
    std::fs::write(
        &config_path,
        format!("[audit.backend]\ntype = \"jsonl\"\npath = {:?}\n", audit_path.display().to_string()),
    )
    .expect("config written");

    let config = config::load_from_file(Some(config_path)).expect("config loaded");
    let runtime = PhiVaultRuntime::build(config).await.expect("runtime built");

    let access = phivault_core::RecordAccess::new("dr-a", "patient", "p1");
    let record = serde_json::json!({"ssn": "123-45-6789"});
    let record = record.as_object().expect("object").clone();
    runtime.records().write_record(&access, &record).await.expect("record written");
    runtime.shutdown().await;

    let contents = std::fs::read_to_string(&audit_path).expect("audit log written");
    assert_eq!(contents.lines().count(), 1);
    assert!(!contents.contains("123-45-6789"));
}
