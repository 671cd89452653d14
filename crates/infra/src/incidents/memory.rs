//! In-memory incident store

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use phivault_core::{IncidentStore, MonitorError};
use phivault_domain::{IncidentStatus, SecurityIncident};
use uuid::Uuid;

/// Incidents kept in memory, listed in creation order
#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<HashMap<Uuid, SecurityIncident>>,
    order: RwLock<Vec<Uuid>>,
}

impl InMemoryIncidentStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create(&self, incident: &SecurityIncident) -> Result<(), MonitorError> {
        let mut incidents = self.incidents.write();
        if incidents.contains_key(&incident.id) {
            return Err(MonitorError::Store(format!("incident {} already exists", incident.id)));
        }
        incidents.insert(incident.id, incident.clone());
        self.order.write().push(incident.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SecurityIncident>, MonitorError> {
        Ok(self.incidents.read().get(&id).cloned())
    }

    async fn update(&self, incident: &SecurityIncident) -> Result<(), MonitorError> {
        let mut incidents = self.incidents.write();
        let slot = incidents.get_mut(&incident.id).ok_or(MonitorError::IncidentNotFound(incident.id))?;
        *slot = incident.clone();
        Ok(())
    }

    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<SecurityIncident>, MonitorError> {
        let incidents = self.incidents.read();
        Ok(self
            .order
            .read()
            .iter()
            .filter_map(|id| incidents.get(id))
            .filter(|incident| status.map_or(true, |s| incident.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use phivault_domain::{IncidentSeverity, MonitoredSubject};

    use super::*;

    fn incident(actor: &str) -> SecurityIncident {
        let now = Utc::now();
        SecurityIncident {
            id: Uuid::now_v7(),
            incident_type: "excessive_phi_access".into(),
            severity: IncidentSeverity::High,
            status: IncidentStatus::Open,
            subject: MonitoredSubject::Actor(actor.into()),
            affected_resources: vec!["p1".into()],
            description: "test".into(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolution: None,
        }
    }

    #[tokio::test]
    async fn lists_in_creation_order_with_status_filter() {
        let store = InMemoryIncidentStore::new();
        let first = incident("dr-a");
        let mut second = incident("dr-b");
        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        second.status = IncidentStatus::Investigating;
        store.update(&second).await.unwrap();

        let all = store.list(None).await.unwrap();
        let open = store.list(Some(IncidentStatus::Open)).await.unwrap();
        assert_eq!(all.iter().map(|i| i.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, first.id);
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_update_fail() {
        let store = InMemoryIncidentStore::new();
        let existing = incident("dr-a");
        store.create(&existing).await.unwrap();

        assert!(matches!(store.create(&existing).await, Err(MonitorError::Store(_))));
        let missing = incident("dr-b");
        assert_eq!(store.update(&missing).await, Err(MonitorError::IncidentNotFound(missing.id)));
        assert_eq!(store.get(missing.id).await.unwrap(), None);
    }
}
