//! Runtime assembly
//!
//! [`PhiVaultRuntime`] turns a validated [`PhiVaultConfig`] into live
//! components: key provider, envelope engine, field policy, audit logger,
//! access monitor, rotation manager and record service. The monitor is
//! subscribed to the audit stream and runs until [`PhiVaultRuntime::shutdown`].

use std::sync::Arc;

use phivault_core::{
    AccessPatternMonitor, AuditErrorSink, AuditLogger, AuditStore, EnvelopeEngine, FanOutErrorSink,
    FieldPolicy, IncidentStore, KeyManagementProvider, PhiRecordService, RecordCipher,
    RotationManager, TracingErrorSink,
};
use phivault_domain::{AuditBackend, KmsBackend, PhiVaultConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::audit::{InMemoryAuditStore, JsonlAuditStore, SqliteAuditStore};
use crate::errors::InfraError;
use crate::incidents::InMemoryIncidentStore;
use crate::kms::{HttpKeyProvider, LocalKeyProvider};

/// Fully wired PhiVault components
pub struct PhiVaultRuntime {
    config: PhiVaultConfig,
    provider: Arc<dyn KeyManagementProvider>,
    engine: EnvelopeEngine,
    policy: Arc<FieldPolicy>,
    audit: AuditLogger,
    monitor: Arc<AccessPatternMonitor>,
    incidents: Arc<dyn IncidentStore>,
    rotation: RotationManager,
    records: PhiRecordService,
    shutdown: CancellationToken,
    monitor_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PhiVaultRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhiVaultRuntime")
            .field("kms_backend", &self.config.kms.backend)
            .field("audit_backend", &self.config.audit.backend)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PhiVaultRuntime {
    /// Build every component from `config` and start the monitor.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `InfraError` if the configuration is invalid, the key
    /// provider cannot be constructed, or the audit store cannot be opened.
    pub async fn build(config: PhiVaultConfig) -> Result<Self, InfraError> {
        Self::builder(config).build().await
    }

    /// Start assembling a runtime with overrides for the configured backends
    pub fn builder(config: PhiVaultConfig) -> PhiVaultRuntimeBuilder {
        PhiVaultRuntimeBuilder {
            config,
            provider: None,
            audit_store: None,
            incident_store: None,
            error_sinks: Vec::new(),
            fail_closed: false,
        }
    }

    /// Validated configuration the runtime was built from
    pub fn config(&self) -> &PhiVaultConfig {
        &self.config
    }

    /// Key provider selected by `kms.backend` or the builder
    pub fn provider(&self) -> &Arc<dyn KeyManagementProvider> {
        &self.provider
    }

    /// Envelope engine shared by the record service and rotation
    pub fn engine(&self) -> &EnvelopeEngine {
        &self.engine
    }

    /// Field policy built from `field_policy`
    pub fn policy(&self) -> &Arc<FieldPolicy> {
        &self.policy
    }

    /// Audit logger; its stream feeds the monitor
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Monitor fed by the audit stream on a background task
    pub fn monitor(&self) -> &Arc<AccessPatternMonitor> {
        &self.monitor
    }

    /// Store the monitor persists incidents to
    pub fn incidents(&self) -> &Arc<dyn IncidentStore> {
        &self.incidents
    }

    /// Rotation manager over the shared engine
    pub fn rotation(&self) -> &RotationManager {
        &self.rotation
    }

    /// Record service wired to the engine, field policy and audit logger
    pub fn records(&self) -> &PhiRecordService {
        &self.records
    }

    /// `true` while the monitor task is alive
    pub fn is_running(&self) -> bool {
        self.monitor_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the monitor and wait for it to drain.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.monitor_task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "access pattern monitor task ended abnormally");
            }
        }
        info!("phivault runtime stopped");
    }
}

impl Drop for PhiVaultRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Overrides for [`PhiVaultRuntime`] assembly
pub struct PhiVaultRuntimeBuilder {
    config: PhiVaultConfig,
    provider: Option<Arc<dyn KeyManagementProvider>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    incident_store: Option<Arc<dyn IncidentStore>>,
    error_sinks: Vec<Arc<dyn AuditErrorSink>>,
    fail_closed: bool,
}

impl PhiVaultRuntimeBuilder {
    /// Use this provider instead of the configured `kms.backend`.
    pub fn key_provider(mut self, provider: Arc<dyn KeyManagementProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use this store instead of the configured `audit.backend`.
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Use this store instead of the in-memory incident store.
    pub fn incident_store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.incident_store = Some(store);
        self
    }

    /// Additional receiver of audit write failures. Failures are always
    /// logged through tracing as well.
    pub fn error_sink(mut self, sink: Arc<dyn AuditErrorSink>) -> Self {
        self.error_sinks.push(sink);
        self
    }

    /// Fail record operations whose audit entry cannot be written.
    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    /// Validate the configuration, open the backends and start the monitor.
    #[instrument(skip_all, fields(kms = ?self.config.kms.backend, audit = ?self.config.audit.backend))]
    pub async fn build(self) -> Result<PhiVaultRuntime, InfraError> {
        let Self { config, provider, audit_store, incident_store, error_sinks, fail_closed } = self;
        config.validate()?;

        let provider = match provider {
            Some(provider) => provider,
            None => key_provider_from_config(&config)?,
        };
        let audit_store = match audit_store {
            Some(store) => store,
            None => audit_store_from_config(&config)?,
        };
        let incidents = incident_store
            .unwrap_or_else(|| Arc::new(InMemoryIncidentStore::new()) as Arc<dyn IncidentStore>);

        let sink = error_sinks
            .into_iter()
            .fold(FanOutErrorSink::new().with(Arc::new(TracingErrorSink)), FanOutErrorSink::with);
        let audit = AuditLogger::from_settings(audit_store, &config.audit).with_error_sink(Arc::new(sink));

        let engine = EnvelopeEngine::from_settings(Arc::clone(&provider), &config.kms);
        let policy = Arc::new(FieldPolicy::new(&config.field_policy));
        let cipher = RecordCipher::new(Arc::clone(&policy), engine.clone());
        let rotation = RotationManager::new(engine.clone(), Arc::clone(&policy));
        let records = PhiRecordService::new(cipher, audit.clone()).with_fail_closed(fail_closed);

        let monitor = Arc::new(AccessPatternMonitor::new(config.monitor.clone(), Arc::clone(&incidents)));
        let shutdown = CancellationToken::new();
        let monitor_task = Arc::clone(&monitor).spawn(audit.subscribe(), shutdown.child_token());

        info!(
            protected_fields = policy.protected_fields().count(),
            tiers = config.monitor.tiers.len(),
            fail_closed,
            "phivault runtime started"
        );

        Ok(PhiVaultRuntime {
            config,
            provider,
            engine,
            policy,
            audit,
            monitor,
            incidents,
            rotation,
            records,
            shutdown,
            monitor_task: Some(monitor_task),
        })
    }
}

fn key_provider_from_config(config: &PhiVaultConfig) -> Result<Arc<dyn KeyManagementProvider>, InfraError> {
    let provider: Arc<dyn KeyManagementProvider> = match &config.kms.backend {
        KmsBackend::Local => {
            warn!("using in-process key provider; master keys do not survive restarts");
            Arc::new(LocalKeyProvider::new().map_err(|e| InfraError::KeyProvider(e.to_string()))?)
        }
        KmsBackend::Http { .. } => Arc::new(
            HttpKeyProvider::from_settings(&config.kms).map_err(|e| InfraError::KeyProvider(e.to_string()))?,
        ),
    };
    Ok(provider)
}

fn audit_store_from_config(config: &PhiVaultConfig) -> Result<Arc<dyn AuditStore>, InfraError> {
    let store: Arc<dyn AuditStore> = match &config.audit.backend {
        AuditBackend::Memory => Arc::new(InMemoryAuditStore::new()),
        AuditBackend::Jsonl { path } => Arc::new(JsonlAuditStore::new(path.clone())),
        AuditBackend::Sqlite { path } => Arc::new(SqliteAuditStore::open(path)?),
    };
    Ok(store)
}
