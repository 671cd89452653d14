//! Configuration structures
//!
//! Every section has a default, so an empty TOML/JSON document is a valid
//! configuration. Loading and environment overrides live in the infra
//! crate's config loader.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::errors::{PhiVaultError, Result};
use crate::types::{AuditAction, FieldKind, FieldPolicyEntry, IncidentSeverity};

/// Longest accepted monitor window, one year
pub const MAX_WINDOW_MINUTES: i64 = 525_600;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhiVaultConfig {
    /// Which fields are PHI and how they are coerced
    pub field_policy: FieldPolicyConfig,
    /// Access pattern thresholds
    pub monitor: MonitorConfig,
    /// Audit store and logger settings
    pub audit: AuditSettings,
    /// Key provider selection, timeouts and retries
    pub kms: KmsSettings,
    /// Tracing subscriber settings
    pub logging: LoggingSettings,
}

impl PhiVaultConfig {
    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.field_policy.list_delimiter.is_empty() {
            return Err(PhiVaultError::Config("field_policy.list_delimiter must not be empty".into()));
        }
        if self.monitor.tiers.is_empty() {
            return Err(PhiVaultError::Config("monitor.tiers must not be empty".into()));
        }
        for (index, tier) in self.monitor.tiers.iter().enumerate() {
            if tier.window_minutes <= 0 {
                return Err(PhiVaultError::Config(format!(
                    "monitor.tiers[{index}].window_minutes must be positive"
                )));
            }
            if tier.window_minutes > MAX_WINDOW_MINUTES {
                return Err(PhiVaultError::Config(format!(
                    "monitor.tiers[{index}].window_minutes must not exceed {MAX_WINDOW_MINUTES}"
                )));
            }
        }
        if self.monitor.channel_capacity == 0 {
            return Err(PhiVaultError::Config("monitor.channel_capacity must be positive".into()));
        }
        if self.audit.page_size == 0 {
            return Err(PhiVaultError::Config("audit.page_size must be positive".into()));
        }
        if self.audit.stream_capacity == 0 {
            return Err(PhiVaultError::Config("audit.stream_capacity must be positive".into()));
        }
        if self.kms.max_attempts == 0 {
            return Err(PhiVaultError::Config("kms.max_attempts must be at least 1".into()));
        }
        if self.kms.request_timeout_ms == 0 {
            return Err(PhiVaultError::Config("kms.request_timeout_ms must be positive".into()));
        }
        if let KmsBackend::Http { base_url, .. } = &self.kms.backend {
            if base_url.trim().is_empty() {
                return Err(PhiVaultError::Config("kms.backend.base_url must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Which record fields are PHI and how they are coerced to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPolicyConfig {
    /// Separator for `delimited_list` fields
    pub list_delimiter: String,
    /// Per-field policy keyed by field name
    pub fields: BTreeMap<String, FieldPolicyEntry>,
}

impl Default for FieldPolicyConfig {
    fn default() -> Self {
        let raw = FieldPolicyEntry::protected(FieldKind::Raw);
        let date = FieldPolicyEntry::protected(FieldKind::IsoDate);
        let list = FieldPolicyEntry::protected(FieldKind::DelimitedList);

        let fields = [
            ("first_name", raw),
            ("last_name", raw),
            ("date_of_birth", date),
            ("ssn", raw),
            ("mrn", raw),
            ("phone", raw),
            ("email", raw),
            ("address", raw),
            ("insurance_member_id", raw),
            ("diagnosis_codes", list),
            ("allergies", list),
            ("medications", list),
        ]
        .into_iter()
        .map(|(name, entry)| (name.to_string(), entry))
        .collect();

        Self { list_delimiter: ",".to_string(), fields }
    }
}

/// One escalation tier: more than `max_accesses` counted events by a
/// subject within `window_minutes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTier {
    /// Severity attached to flags and incidents from this tier
    pub severity: IncidentSeverity,
    /// Breached when the window holds more than this many accesses
    pub max_accesses: usize,
    /// Sliding window length, at most [`MAX_WINDOW_MINUTES`]
    pub window_minutes: i64,
    /// Open an incident immediately instead of waiting for review
    #[serde(default)]
    pub auto_escalate: bool,
    /// Actions counted by this tier; empty counts every action
    #[serde(default)]
    pub actions: Vec<AuditAction>,
}

impl ThresholdTier {
    /// `true` when `action` counts towards this tier
    pub fn counts(&self, action: AuditAction) -> bool {
        self.actions.is_empty() || self.actions.contains(&action)
    }

    /// Window length, or `None` when `window_minutes` is not positive.
    /// Lengths beyond what `TimeDelta` can hold saturate.
    pub fn window(&self) -> Option<TimeDelta> {
        (self.window_minutes > 0)
            .then(|| TimeDelta::try_minutes(self.window_minutes).unwrap_or(TimeDelta::MAX))
    }
}

/// Access pattern monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Threshold tiers; the most severe breached tier wins
    pub tiers: Vec<ThresholdTier>,
    /// Track per-resource volume in addition to per-actor volume
    pub track_resources: bool,
    /// Capacity of the monitor event broadcast channel
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                ThresholdTier {
                    severity: IncidentSeverity::Medium,
                    max_accesses: 100,
                    window_minutes: 60,
                    auto_escalate: false,
                    actions: Vec::new(),
                },
                ThresholdTier {
                    severity: IncidentSeverity::High,
                    max_accesses: 250,
                    window_minutes: 60,
                    auto_escalate: true,
                    actions: Vec::new(),
                },
                ThresholdTier {
                    severity: IncidentSeverity::Critical,
                    max_accesses: 50,
                    window_minutes: 5,
                    auto_escalate: true,
                    actions: Vec::new(),
                },
            ],
            track_resources: false,
            channel_capacity: 1024,
        }
    }
}

/// Where audit entries are stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditBackend {
    #[default]
    Memory,
    Jsonl {
        path: PathBuf,
    },
    Sqlite {
        path: PathBuf,
    },
}

/// Audit logger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Storage backend
    pub backend: AuditBackend,
    /// Entries fetched per page by lazy queries
    pub page_size: usize,
    /// Upper bound on one audit append
    pub write_timeout_ms: u64,
    /// Capacity of the live audit broadcast channel
    pub stream_capacity: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Memory,
            page_size: 100,
            write_timeout_ms: 2_000,
            stream_capacity: 1024,
        }
    }
}

/// Which key-management provider issues data keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KmsBackend {
    #[default]
    Local,
    Http {
        base_url: String,
        /// Name of the environment variable holding the bearer token
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

/// Key provider settings. Timeouts and retries apply per provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsSettings {
    /// Provider backend
    pub backend: KmsBackend,
    /// Deadline for a single provider attempt
    pub request_timeout_ms: u64,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First retry delay
    pub initial_backoff_ms: u64,
    /// Cap on the exponential retry delay
    pub max_backoff_ms: u64,
}

impl Default for KmsSettings {
    fn default() -> Self {
        Self {
            backend: KmsBackend::Local,
            request_timeout_ms: 5_000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

/// Tracing output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `phivault_core=debug,info`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PhiVaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.tiers.len(), 3);
        assert_eq!(config.field_policy.fields.len(), 12);
        assert_eq!(config.field_policy.fields["date_of_birth"].kind, FieldKind::IsoDate);
    }

    #[test]
    fn empty_tiers_fail_validation() {
        let mut config = PhiVaultConfig::default();
        config.monitor.tiers.clear();
        assert!(matches!(config.validate(), Err(PhiVaultError::Config(_))));
    }

    #[test]
    fn zero_attempts_fail_validation() {
        let mut config = PhiVaultConfig::default();
        config.kms.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PhiVaultConfig = toml::from_str(
            r#"
            [kms]
            request_timeout_ms = 750

            [kms.backend]
            type = "http"
            base_url = "https://kms.internal"

            [audit.backend]
            type = "sqlite"
            path = "/var/lib/phivault/audit.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.kms.request_timeout_ms, 750);
        assert_eq!(config.kms.max_attempts, 3);
        assert!(matches!(config.kms.backend, KmsBackend::Http { ref base_url, .. } if base_url == "https://kms.internal"));
        assert!(matches!(config.audit.backend, AuditBackend::Sqlite { .. }));
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn window_minutes_are_bounded() {
        let mut config = PhiVaultConfig::default();
        config.monitor.tiers[0].window_minutes = MAX_WINDOW_MINUTES;
        assert!(config.validate().is_ok());

        config.monitor.tiers[0].window_minutes = 200_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("monitor.tiers[0].window_minutes"));

        config.monitor.tiers[0].window_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tier_window_saturates_and_rejects_non_positive() {
        let mut tier = MonitorConfig::default().tiers[0].clone();
        assert_eq!(tier.window(), Some(TimeDelta::minutes(60)));

        tier.window_minutes = 200_000_000_000_000;
        assert_eq!(tier.window(), Some(TimeDelta::MAX));

        tier.window_minutes = -5;
        assert_eq!(tier.window(), None);
    }

    #[test]
    fn tier_with_no_actions_counts_everything() {
        let tier = &MonitorConfig::default().tiers[0];
        assert!(tier.counts(AuditAction::View));
        assert!(tier.counts(AuditAction::Delete));
    }
}
