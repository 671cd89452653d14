//! Port interface for security incident persistence

use async_trait::async_trait;
use phivault_domain::{IncidentStatus, SecurityIncident};
use uuid::Uuid;

use crate::errors::MonitorError;

/// Trait for security incident storage
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Persist a new incident
    async fn create(&self, incident: &SecurityIncident) -> Result<(), MonitorError>;

    /// Get an incident by ID
    async fn get(&self, id: Uuid) -> Result<Option<SecurityIncident>, MonitorError>;

    /// Replace an existing incident
    async fn update(&self, incident: &SecurityIncident) -> Result<(), MonitorError>;

    /// List incidents, optionally only those in `status`, oldest first
    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<SecurityIncident>, MonitorError>;
}
