//! Master key rotation scheduling
//!
//! Decides when the background rotator should ask the provider for a new
//! master key. Time is passed in explicitly so the schedule can be driven by
//! any [`Clock`](phivault_common::Clock).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Key rotation schedule
///
/// Tracks when the last rotation occurred and determines whether the
/// configured interval has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotationSchedule {
    /// Number of days between rotations
    pub rotation_days: u32,

    last_rotation: Option<DateTime<Utc>>,
}

impl Default for KeyRotationSchedule {
    fn default() -> Self {
        Self { rotation_days: 90, last_rotation: None }
    }
}

impl KeyRotationSchedule {
    /// Schedule that has never rotated
    pub fn new(rotation_days: u32) -> Self {
        Self { rotation_days, last_rotation: None }
    }

    /// Resume a schedule from a persisted last-rotation time.
    #[must_use]
    pub fn with_last_rotation(mut self, at: DateTime<Utc>) -> Self {
        self.last_rotation = Some(at);
        self
    }

    /// `true` once more than `rotation_days` have elapsed since the last
    /// rotation. A schedule that has never rotated is not due.
    ///
    /// A clock that went backwards counts as zero elapsed time.
    pub fn should_rotate(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now)
            .is_some_and(|elapsed| elapsed > Duration::days(i64::from(self.rotation_days)))
    }

    /// Mark a rotation as done at `now`
    pub fn record_rotation(&mut self, now: DateTime<Utc>) {
        self.last_rotation = Some(now);
    }

    /// Time of the last recorded rotation
    pub fn last_rotation(&self) -> Option<DateTime<Utc>> {
        self.last_rotation
    }

    /// Whole days since the last rotation; `None` if never rotated.
    pub fn days_since_last_rotation(&self, now: DateTime<Utc>) -> Option<i64> {
        self.elapsed(now).map(|elapsed| elapsed.num_days())
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_rotation.map(|last| {
            let elapsed = now - last;
            if elapsed < Duration::zero() {
                warn!(
                    last_rotation = %last,
                    now = %now,
                    "clock went backwards during key rotation check, defaulting to zero elapsed time"
                );
                Duration::zero()
            } else {
                elapsed
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Validates `KeyRotationSchedule::default` behavior for the default
    /// schedule scenario.
    ///
    /// Assertions:
    /// - Confirms `schedule.rotation_days` equals `90`.
    /// - Ensures a fresh schedule is never due.
    #[test]
    fn test_default_schedule() {
        let schedule = KeyRotationSchedule::default();
        assert_eq!(schedule.rotation_days, 90);
        assert!(schedule.last_rotation().is_none());
        assert!(!schedule.should_rotate(t0()));
    }

    /// Validates `KeyRotationSchedule::should_rotate` behavior around the
    /// interval boundary.
    ///
    /// Assertions:
    /// - Ensures exactly `rotation_days` after the last rotation is not due.
    /// - Ensures one second later is due.
    #[test]
    fn test_rotation_due_after_interval() {
        let mut schedule = KeyRotationSchedule::new(30);
        schedule.record_rotation(t0());

        assert!(!schedule.should_rotate(t0() + Duration::days(30)));
        assert!(schedule.should_rotate(t0() + Duration::days(30) + Duration::seconds(1)));
        assert_eq!(schedule.days_since_last_rotation(t0() + Duration::days(31)), Some(31));
    }

    /// Validates `KeyRotationSchedule::should_rotate` behavior for the clock
    /// skew scenario.
    ///
    /// Assertions:
    /// - Ensures a `now` before the last rotation is not due.
    /// - Confirms elapsed days clamp to `0`.
    #[test]
    fn test_backwards_clock_is_not_due() {
        let schedule = KeyRotationSchedule::new(1).with_last_rotation(t0());
        let earlier = t0() - Duration::days(10);

        assert!(!schedule.should_rotate(earlier));
        assert_eq!(schedule.days_since_last_rotation(earlier), Some(0));
    }
}
