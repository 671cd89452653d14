//! Batch detection of anomalous access volume
//!
//! Pure function of a slice of entries and the configured tiers. Used for
//! compliance reports; the live monitor applies the same window semantics
//! incrementally.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use phivault_domain::{
    AccessPattern, AuditAction, AuditLogEntry, MonitorConfig, MonitoredSubject, ThresholdTier,
};

/// Subjects an entry counts towards
pub(crate) fn subjects_for(entry: &AuditLogEntry, track_resources: bool) -> Vec<MonitoredSubject> {
    let mut subjects = vec![MonitoredSubject::Actor(entry.actor_id.clone())];
    if track_resources {
        subjects.push(MonitoredSubject::Resource(format!(
            "{}/{}",
            entry.resource_type, entry.resource_id
        )));
    }
    subjects
}

/// Most severe breached tier per subject, most severe first.
///
/// A tier is breached when more than `max_accesses` counted events fall in
/// some window `(t - window_minutes, t]`.
pub fn detect_patterns(entries: &[AuditLogEntry], config: &MonitorConfig) -> Vec<AccessPattern> {
    let mut by_subject: HashMap<MonitoredSubject, Vec<(DateTime<Utc>, AuditAction)>> = HashMap::new();
    for entry in entries {
        for subject in subjects_for(entry, config.track_resources) {
            by_subject.entry(subject).or_default().push((entry.created_at, entry.action));
        }
    }

    let mut patterns: Vec<AccessPattern> = by_subject
        .into_iter()
        .filter_map(|(subject, mut events)| {
            events.sort_by_key(|(at, _)| *at);
            config
                .tiers
                .iter()
                .filter_map(|tier| peak_window(&events, tier).map(|peak| (tier, peak)))
                .max_by_key(|(tier, _)| tier.severity)
                .map(|(tier, peak)| AccessPattern {
                    subject,
                    severity: tier.severity,
                    access_count: peak.count,
                    window_minutes: tier.window_minutes,
                    first_seen: peak.first,
                    last_seen: peak.last,
                })
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.severity.cmp(&a.severity).then_with(|| a.subject.to_string().cmp(&b.subject.to_string()))
    });
    patterns
}

struct Peak {
    count: usize,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

fn peak_window(events: &[(DateTime<Utc>, AuditAction)], tier: &ThresholdTier) -> Option<Peak> {
    let window = tier.window()?;
    let times: Vec<DateTime<Utc>> =
        events.iter().filter(|(_, action)| tier.counts(*action)).map(|(at, _)| *at).collect();

    let mut best: Option<Peak> = None;
    let mut start = 0;
    for (end, &at) in times.iter().enumerate() {
        // no horizon when the window reaches past the representable range
        if let Some(horizon) = at.checked_sub_signed(window) {
            while times[start] <= horizon {
                start += 1;
            }
        }
        let count = end - start + 1;
        if count > tier.max_accesses && best.as_ref().map_or(true, |b| count > b.count) {
            best = Some(Peak { count, first: times[start], last: at });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use phivault_domain::IncidentSeverity;
    use uuid::Uuid;

    use super::*;

    fn entry(actor: &str, action: AuditAction, at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::now_v7(),
            actor_id: actor.into(),
            resource_type: "patient".into(),
            resource_id: "p1".into(),
            action,
            accessed_fields: Vec::new(),
            ip_address: None,
            session_id: None,
            request_id: None,
            reason: None,
            territory_id: None,
            created_at: at,
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            tiers: vec![
                ThresholdTier {
                    severity: IncidentSeverity::Medium,
                    max_accesses: 3,
                    window_minutes: 10,
                    auto_escalate: false,
                    actions: vec![AuditAction::View],
                },
                ThresholdTier {
                    severity: IncidentSeverity::High,
                    max_accesses: 5,
                    window_minutes: 10,
                    auto_escalate: true,
                    actions: Vec::new(),
                },
            ],
            ..MonitorConfig::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn counts_at_threshold_are_not_patterns() {
        let entries: Vec<_> =
            (0..3).map(|i| entry("dr-a", AuditAction::View, t0() + Duration::minutes(i))).collect();
        assert!(detect_patterns(&entries, &config()).is_empty());
    }

    #[test]
    fn picks_most_severe_breached_tier() {
        let entries: Vec<_> =
            (0..6).map(|i| entry("dr-a", AuditAction::View, t0() + Duration::minutes(i))).collect();

        let patterns = detect_patterns(&entries, &config());

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].severity, IncidentSeverity::High);
        assert_eq!(patterns[0].access_count, 6);
        assert_eq!(patterns[0].first_seen, t0());
        assert_eq!(patterns[0].last_seen, t0() + Duration::minutes(5));
    }

    #[test]
    fn events_spread_beyond_window_do_not_breach() {
        let entries: Vec<_> =
            (0..6).map(|i| entry("dr-a", AuditAction::View, t0() + Duration::minutes(i * 5))).collect();
        assert!(detect_patterns(&entries, &config()).is_empty());
    }

    #[test]
    fn tier_only_counts_its_actions() {
        let entries: Vec<_> =
            (0..4).map(|i| entry("dr-a", AuditAction::Modify, t0() + Duration::minutes(i))).collect();
        assert!(detect_patterns(&entries, &config()).is_empty());
    }

    #[test]
    fn resources_are_tracked_when_enabled() {
        let mut cfg = config();
        cfg.track_resources = true;
        let entries: Vec<_> = (0..4)
            .map(|i| entry(&format!("dr-{i}"), AuditAction::View, t0() + Duration::minutes(i)))
            .collect();

        let patterns = detect_patterns(&entries, &cfg);

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].subject, MonitoredSubject::Resource("patient/p1".into()));
    }

    #[test]
    fn non_positive_window_detects_nothing() {
        let mut cfg = config();
        for tier in &mut cfg.tiers {
            tier.window_minutes = 0;
        }
        cfg.tiers[1].window_minutes = -3;
        let entries: Vec<_> =
            (0..8).map(|i| entry("dr-a", AuditAction::View, t0() + Duration::seconds(i))).collect();

        assert!(detect_patterns(&entries, &cfg).is_empty());
    }

    #[test]
    fn window_wider_than_the_calendar_counts_everything() {
        let mut cfg = config();
        cfg.tiers[1].window_minutes = 200_000_000_000_000;
        let entries: Vec<_> =
            (0..6).map(|i| entry("dr-a", AuditAction::Modify, t0() + Duration::days(i * 400))).collect();

        let patterns = detect_patterns(&entries, &cfg);

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].access_count, 6);
        assert_eq!(patterns[0].first_seen, t0());
    }
}
