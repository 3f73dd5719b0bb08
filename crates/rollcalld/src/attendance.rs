//! Dedup gates between recognition events and the database.
//!
//! The pipeline recognizes the same person dozens of times per second; these
//! gates decide which sightings actually reach the store. Pure state machine,
//! no I/O — callers pass the clock in, which keeps the tests deterministic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate gates for raw logging, attendance syncing, and unknown alerts.
///
/// A gate that fires records its own timestamp, so the next sighting inside
/// the window is suppressed. Gates for different persons are independent; the
/// unknown-alert gate is global.
pub struct AttendanceGates {
    raw_log_interval: Duration,
    sync_cooldown: Duration,
    unknown_cooldown: Duration,
    last_raw_log: HashMap<String, Instant>,
    last_sync: HashMap<String, Instant>,
    last_unknown_alert: Option<Instant>,
}

impl AttendanceGates {
    pub fn new(
        raw_log_interval: Duration,
        sync_cooldown: Duration,
        unknown_cooldown: Duration,
    ) -> Self {
        Self {
            raw_log_interval,
            sync_cooldown,
            unknown_cooldown,
            last_raw_log: HashMap::new(),
            last_sync: HashMap::new(),
            last_unknown_alert: None,
        }
    }

    /// Whether a raw detection log row is due for this person. Firing arms
    /// the gate until `raw_log_interval` has passed.
    pub fn raw_log_due(&mut self, person_id: &str, now: Instant) -> bool {
        Self::per_person_due(&mut self.last_raw_log, self.raw_log_interval, person_id, now)
    }

    /// Whether an attendance sync is due for this person.
    pub fn sync_due(&mut self, person_id: &str, now: Instant) -> bool {
        Self::per_person_due(&mut self.last_sync, self.sync_cooldown, person_id, now)
    }

    /// Whether an unknown-face alert is due. One global gate: a crowd of
    /// strangers produces one alert per cooldown, not one per stranger.
    pub fn unknown_alert_due(&mut self, now: Instant) -> bool {
        match self.last_unknown_alert {
            Some(last) if now.duration_since(last) < self.unknown_cooldown => false,
            _ => {
                self.last_unknown_alert = Some(now);
                true
            }
        }
    }

    fn per_person_due(
        map: &mut HashMap<String, Instant>,
        window: Duration,
        person_id: &str,
        now: Instant,
    ) -> bool {
        match map.get(person_id) {
            Some(&last) if now.duration_since(last) < window => false,
            _ => {
                map.insert(person_id.to_string(), now);
                true
            }
        }
    }
}
