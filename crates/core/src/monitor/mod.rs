//! Access pattern monitor
//!
//! Consumes audit entries and keeps a sliding window of recent accesses per
//! monitored subject. Each subject moves through
//! `Normal -> Flagged -> Normal | Escalated`; escalation opens exactly one
//! [`SecurityIncident`], whose status only changes through
//! [`AccessPatternMonitor::update_incident`].

mod detector;
pub mod ports;

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use phivault_common::{Clock, SystemClock};
use phivault_domain::{
    AccessPattern, AuditAction, AuditLogEntry, IncidentSeverity, IncidentStatus, MonitorConfig,
    MonitoredSubject, ReviewDecision, SecurityIncident, SubjectState, ThresholdTier,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use detector::detect_patterns;
use detector::subjects_for;
use ports::IncidentStore;

use crate::errors::MonitorError;

const INCIDENT_TYPE: &str = "excessive_phi_access";

/// Observations between sweeps of idle subjects
const PRUNE_EVERY: u64 = 256;

/// State change produced by the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Flagged { subject: MonitoredSubject, severity: IncidentSeverity, access_count: usize },
    Escalated { subject: MonitoredSubject, incident_id: Uuid, severity: IncidentSeverity },
    Cleared { subject: MonitoredSubject },
    IncidentUpdated { incident_id: Uuid, status: IncidentStatus },
}

#[derive(Debug, Default)]
struct SubjectTracker {
    /// Ordered by timestamp
    events: VecDeque<(DateTime<Utc>, AuditAction, String)>,
    state: SubjectState,
    severity: Option<IncidentSeverity>,
    incident_id: Option<Uuid>,
}

impl SubjectTracker {
    fn reset(&mut self) {
        self.events.clear();
        self.state = SubjectState::Normal;
        self.severity = None;
        self.incident_id = None;
    }

    /// Counted events in `(now - window, now]`.
    fn count_within(&self, tier: &ThresholdTier, now: DateTime<Utc>) -> usize {
        let Some(window) = tier.window() else {
            return 0;
        };
        let since = now.checked_sub_signed(window);
        self.events
            .iter()
            .filter(|(at, action, _)| {
                *at <= now && since.map_or(true, |since| *at > since) && tier.counts(*action)
            })
            .count()
    }

    /// Normal and with nothing left inside the longest window
    fn is_idle(&self, horizon: Option<DateTime<Utc>>) -> bool {
        self.state == SubjectState::Normal
            && self.events.back().map_or(true, |(at, _, _)| horizon.is_some_and(|h| *at <= h))
    }

    fn resources(&self) -> Vec<String> {
        self.events.iter().map(|(_, _, r)| r.clone()).collect::<BTreeSet<_>>().into_iter().collect()
    }
}

struct Breach {
    severity: IncidentSeverity,
    access_count: usize,
    max_accesses: usize,
    window_minutes: i64,
    auto_escalate: bool,
}

enum Decision {
    None,
    Flag(Breach),
    Escalate { breach: Breach, resources: Vec<String> },
}

/// Sliding-window access monitor with an operator-driven incident workflow
pub struct AccessPatternMonitor {
    config: MonitorConfig,
    subjects: DashMap<MonitoredSubject, SubjectTracker>,
    incidents: Arc<dyn IncidentStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<MonitorEvent>,
    max_window: TimeDelta,
    observed: AtomicU64,
}

impl AccessPatternMonitor {
    /// Monitor with no tracked subjects, persisting incidents to `incidents`
    pub fn new(config: MonitorConfig, incidents: Arc<dyn IncidentStore>) -> Self {
        let max_window =
            config.tiers.iter().filter_map(ThresholdTier::window).max().unwrap_or_else(TimeDelta::zero);
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            subjects: DashMap::new(),
            incidents,
            clock: Arc::new(SystemClock),
            events,
            max_window,
            observed: AtomicU64::new(0),
        }
    }

    /// Clock for incident timestamps. Windows use entry timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Thresholds this monitor evaluates
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Subscribe to state changes as they happen.
    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Current state; untracked subjects are `Normal`.
    pub fn subject_state(&self, subject: &MonitoredSubject) -> SubjectState {
        self.subjects.get(subject).map(|t| t.state).unwrap_or_default()
    }

    /// Number of subjects currently holding window state.
    pub fn tracked_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// Drop `Normal` subjects with no accesses left inside the longest
    /// window ending at `now`. Returns how many were dropped.
    ///
    /// [`observe`](Self::observe) sweeps on its own every few hundred
    /// entries, measured on the entry's `created_at`.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let horizon = now.checked_sub_signed(self.max_window);
        let mut pruned = 0;
        self.subjects.retain(|_, tracker| {
            let idle = tracker.is_idle(horizon);
            pruned += usize::from(idle);
            !idle
        });
        if pruned > 0 {
            debug!(pruned, remaining = self.subjects.len(), "idle monitor subjects dropped");
        }
        pruned
    }

    /// Feed one audit entry. Window arithmetic uses the entry's own
    /// `created_at`, so replayed history is evaluated as it happened.
    pub async fn observe(&self, entry: &AuditLogEntry) -> Result<Vec<MonitorEvent>, MonitorError> {
        let mut produced = Vec::new();

        for subject in subjects_for(entry, self.config.track_resources) {
            // decided under the shard lock, acted on after it is released
            let decision = {
                let mut tracker = self.subjects.entry(subject.clone()).or_default();
                self.record(&mut tracker, entry);
                self.decide(&mut tracker, entry.created_at)
            };

            match decision {
                Decision::None => {}
                Decision::Flag(breach) => {
                    warn!(
                        subject = %subject,
                        severity = %breach.severity,
                        access_count = breach.access_count,
                        "access volume threshold exceeded, subject flagged"
                    );
                    produced.push(MonitorEvent::Flagged {
                        subject,
                        severity: breach.severity,
                        access_count: breach.access_count,
                    });
                }
                Decision::Escalate { breach, resources } => {
                    let description = format!(
                        "{} accesses within {} minutes exceeded the {} threshold of {}",
                        breach.access_count, breach.window_minutes, breach.severity, breach.max_accesses
                    );
                    let incident = self
                        .open_incident(&subject, breach.severity, resources, description)
                        .await?;
                    produced.push(MonitorEvent::Escalated {
                        subject,
                        incident_id: incident.id,
                        severity: incident.severity,
                    });
                }
            }
        }

        for event in &produced {
            let _ = self.events.send(event.clone());
        }
        if self.observed.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune_idle(entry.created_at);
        }
        Ok(produced)
    }

    /// Operator review of a flagged subject.
    ///
    /// `Clear` returns the subject to `Normal` with an empty window;
    /// `Escalate` opens an incident. Subjects that are not flagged cannot be
    /// reviewed.
    pub async fn review_subject(
        &self,
        subject: &MonitoredSubject,
        decision: ReviewDecision,
    ) -> Result<Option<SecurityIncident>, MonitorError> {
        let outcome = {
            let mut tracker = match self.subjects.get_mut(subject) {
                Some(tracker) if tracker.state == SubjectState::Flagged => tracker,
                other => {
                    let from = other.map(|t| t.state).unwrap_or_default();
                    let target = match decision {
                        ReviewDecision::Clear => SubjectState::Normal,
                        ReviewDecision::Escalate => SubjectState::Escalated,
                    };
                    return Err(MonitorError::InvalidTransition {
                        from: from.to_string(),
                        to: target.to_string(),
                    });
                }
            };
            match decision {
                ReviewDecision::Clear => {
                    tracker.reset();
                    None
                }
                ReviewDecision::Escalate => {
                    tracker.state = SubjectState::Escalated;
                    let severity = tracker.severity.unwrap_or(IncidentSeverity::Medium);
                    Some((severity, tracker.resources()))
                }
            }
        };

        match outcome {
            None => {
                info!(subject = %subject, "flagged subject cleared on review");
                let _ = self.events.send(MonitorEvent::Cleared { subject: subject.clone() });
                Ok(None)
            }
            Some((severity, resources)) => {
                let description = format!("escalated on operator review of {subject}");
                let incident = self.open_incident(subject, severity, resources, description).await?;
                let _ = self.events.send(MonitorEvent::Escalated {
                    subject: subject.clone(),
                    incident_id: incident.id,
                    severity,
                });
                Ok(Some(incident))
            }
        }
    }

    /// Move an incident one step along `Open -> Investigating -> Resolved`.
    ///
    /// Resolving requires a non-blank resolution note and returns the
    /// subject to `Normal`.
    pub async fn update_incident(
        &self,
        id: Uuid,
        status: IncidentStatus,
        resolution: Option<String>,
    ) -> Result<SecurityIncident, MonitorError> {
        let mut incident =
            self.incidents.get(id).await?.ok_or(MonitorError::IncidentNotFound(id))?;

        if !incident.status.can_transition_to(status) {
            return Err(MonitorError::status_transition(incident.status, status));
        }

        let now = self.clock.now();
        if status == IncidentStatus::Resolved {
            let note = resolution
                .as_deref()
                .map(str::trim)
                .filter(|note| !note.is_empty())
                .ok_or(MonitorError::MissingResolution)?;
            incident.resolution = Some(note.to_owned());
            incident.resolved_at = Some(now);
        } else if let Some(note) = resolution {
            incident.resolution = Some(note);
        }
        incident.status = status;
        incident.updated_at = now;

        self.incidents.update(&incident).await?;

        if status == IncidentStatus::Resolved {
            if let Some(mut tracker) = self.subjects.get_mut(&incident.subject) {
                if tracker.incident_id == Some(id) {
                    tracker.reset();
                }
            }
        }

        info!(incident_id = %id, status = %status, "security incident updated");
        let _ = self.events.send(MonitorEvent::IncidentUpdated { incident_id: id, status });
        Ok(incident)
    }

    /// Incidents with `status`, or all of them
    pub async fn list_incidents(
        &self,
        status: Option<IncidentStatus>,
    ) -> Result<Vec<SecurityIncident>, MonitorError> {
        self.incidents.list(status).await
    }

    /// Batch detection over `entries` with this monitor's thresholds.
    pub fn detect_patterns(&self, entries: &[AuditLogEntry]) -> Vec<AccessPattern> {
        detect_patterns(entries, &self.config)
    }

    /// Consume the audit stream until `shutdown` fires or the stream closes.
    pub async fn run(self: Arc<Self>, mut entries: broadcast::Receiver<AuditLogEntry>, shutdown: CancellationToken) {
        info!("access pattern monitor started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = entries.recv() => match received {
                    Ok(entry) => {
                        if let Err(err) = self.observe(&entry).await {
                            error!(entry_id = %entry.id, error = %err, "failed to evaluate audit entry");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "access pattern monitor lagged behind the audit stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("access pattern monitor stopped");
    }

    /// [`run`](Self::run) on a new task
    pub fn spawn(
        self: Arc<Self>,
        entries: broadcast::Receiver<AuditLogEntry>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(entries, shutdown))
    }

    /// Insert in timestamp order, then drop what has left the longest
    /// window behind the newest event. Entries may arrive out of order.
    fn record(&self, tracker: &mut SubjectTracker, entry: &AuditLogEntry) {
        let at = entry.created_at;
        let position = tracker.events.partition_point(|(seen, _, _)| *seen <= at);
        tracker.events.insert(position, (at, entry.action, entry.resource_id.clone()));

        let newest = tracker.events.back().map_or(at, |(seen, _, _)| *seen);
        let Some(horizon) = newest.checked_sub_signed(self.max_window) else {
            return;
        };
        while tracker.events.front().is_some_and(|(seen, _, _)| *seen <= horizon) {
            tracker.events.pop_front();
        }
    }

    fn breach(&self, tracker: &SubjectTracker, now: DateTime<Utc>) -> Option<Breach> {
        self.config
            .tiers
            .iter()
            .filter_map(|tier| {
                let count = tracker.count_within(tier, now);
                (count > tier.max_accesses).then_some(Breach {
                    severity: tier.severity,
                    access_count: count,
                    max_accesses: tier.max_accesses,
                    window_minutes: tier.window_minutes,
                    auto_escalate: tier.auto_escalate,
                })
            })
            .max_by_key(|b| (b.severity, b.auto_escalate))
    }

    fn decide(&self, tracker: &mut SubjectTracker, now: DateTime<Utc>) -> Decision {
        let Some(breach) = self.breach(tracker, now) else {
            return Decision::None;
        };

        match tracker.state {
            SubjectState::Normal if breach.auto_escalate => {
                tracker.state = SubjectState::Escalated;
                tracker.severity = Some(breach.severity);
                Decision::Escalate { breach, resources: tracker.resources() }
            }
            SubjectState::Normal => {
                tracker.state = SubjectState::Flagged;
                tracker.severity = Some(breach.severity);
                Decision::Flag(breach)
            }
            SubjectState::Flagged if breach.auto_escalate => {
                tracker.state = SubjectState::Escalated;
                tracker.severity = Some(breach.severity);
                Decision::Escalate { breach, resources: tracker.resources() }
            }
            SubjectState::Flagged => {
                if tracker.severity < Some(breach.severity) {
                    tracker.severity = Some(breach.severity);
                }
                Decision::None
            }
            SubjectState::Escalated => Decision::None,
        }
    }

    async fn open_incident(
        &self,
        subject: &MonitoredSubject,
        severity: IncidentSeverity,
        affected_resources: Vec<String>,
        description: String,
    ) -> Result<SecurityIncident, MonitorError> {
        let now = self.clock.now();
        let incident = SecurityIncident {
            id: Uuid::now_v7(),
            incident_type: INCIDENT_TYPE.to_string(),
            severity,
            status: IncidentStatus::Open,
            subject: subject.clone(),
            affected_resources,
            description,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolution: None,
        };

        if let Err(err) = self.incidents.create(&incident).await {
            // leave the subject reviewable so the escalation can be retried
            if let Some(mut tracker) = self.subjects.get_mut(subject) {
                tracker.state = SubjectState::Flagged;
            }
            error!(subject = %subject, error = %err, "failed to persist security incident");
            return Err(err);
        }

        if let Some(mut tracker) = self.subjects.get_mut(subject) {
            tracker.incident_id = Some(incident.id);
        }
        warn!(
            incident_id = %incident.id,
            subject = %subject,
            severity = %severity,
            "security incident opened"
        );
        debug!(affected = incident.affected_resources.len(), "incident scope recorded");
        Ok(incident)
    }
}
