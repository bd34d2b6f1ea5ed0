//! C5 — proximity alerter.
//!
//! Converts relative depth to pseudo-metric distance and raises tiered,
//! cooldown-throttled proximity alerts for tracked objects.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::vision::detection::TrackedObject;
use crate::vision::trajectory::Severity;

const CRITICAL_DISTANCE_M: f32 = 0.5;
const WARNING_DISTANCE_M: f32 = 1.5;
const NOTICE_DISTANCE_M: f32 = 3.0;
const ALERT_COOLDOWN_SEC: f64 = 5.0;
const APPROACHING_VY_PX: f32 = -5.0;

#[derive(Debug, Clone)]
pub struct ProximityAlert {
    pub track_id: u64,
    pub class_name: String,
    pub distance_m: f32,
    pub severity: Severity,
    pub message: String,
}

/// Two-regime relative-depth-to-meters conversion, clamped to a sane range.
pub fn relative_to_meters(raw: f32) -> f32 {
    let m = if raw > 100.0 {
        500.0 / raw
    } else {
        5.0 / raw.max(0.01)
    };
    m.clamp(0.1, 20.0)
}

pub struct ProximityAlerter {
    last_alert_time: HashMap<String, Instant>,
}

impl Default for ProximityAlerter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityAlerter {
    pub fn new() -> Self {
        Self {
            last_alert_time: HashMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.last_alert_time.clear();
    }

    fn can_alert(&self, zone: &str) -> bool {
        match self.last_alert_time.get(zone) {
            None => true,
            Some(t) => t.elapsed() >= Duration::from_secs_f64(ALERT_COOLDOWN_SEC),
        }
    }

    /// Check all tracked objects with known depth for proximity; returns
    /// alerts sorted by ascending distance.
    pub fn check(&mut self, tracks: &[TrackedObject]) -> Vec<ProximityAlert> {
        let mut alerts: Vec<ProximityAlert> = Vec::new();

        for track in tracks {
            let Some(depth) = track.depth else {
                continue;
            };
            let distance_m = relative_to_meters(depth);

            let approaching = track.velocity.1 < APPROACHING_VY_PX;
            let severity = if distance_m < CRITICAL_DISTANCE_M {
                Severity::Critical
            } else if distance_m < WARNING_DISTANCE_M {
                Severity::Warning
            } else if distance_m < NOTICE_DISTANCE_M && approaching {
                Severity::Notice
            } else {
                continue;
            };

            let zone_key = format!("{:?}_{}", severity, track.class_name);
            if !self.can_alert(&zone_key) {
                continue;
            }
            self.last_alert_time.insert(zone_key, Instant::now());

            let message = format_proximity_summary(&track.class_name, distance_m, severity);
            alerts.push(ProximityAlert {
                track_id: track.track_id,
                class_name: track.class_name.clone(),
                distance_m,
                severity,
                message,
            });
        }

        alerts.sort_by(|a, b| a.distance_m.partial_cmp(&b.distance_m).unwrap());
        alerts
    }
}

fn format_proximity_summary(class_name: &str, distance_m: f32, severity: Severity) -> String {
    match severity {
        Severity::Critical => format!(
            "Sir, {} is dangerously close — {:.1} meters away.",
            class_name, distance_m
        ),
        Severity::Warning => format!("{} is nearby — {:.1} meters away.", class_name, distance_m),
        Severity::Notice => format!("{} detected at {:.1} meters.", class_name, distance_m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detection::BBox;
    use std::time::Instant as StdInstant;

    fn track(depth: Option<f32>) -> TrackedObject {
        track_with_velocity(depth, (0.0, 0.0))
    }

    fn track_with_velocity(depth: Option<f32>, velocity: (f32, f32)) -> TrackedObject {
        TrackedObject {
            track_id: 1,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            class_id: 0,
            class_name: "person".into(),
            velocity,
            frames_seen: 1,
            age_since_last_match: 0,
            last_seen: StdInstant::now(),
            depth,
            flow: None,
        }
    }

    #[test]
    fn relative_to_meters_is_clamped() {
        assert!(relative_to_meters(0.0001) <= 20.0);
        assert!(relative_to_meters(10_000.0) >= 0.1);
    }

    #[test]
    fn no_depth_means_no_alert() {
        let mut alerter = ProximityAlerter::new();
        let alerts = alerter.check(&[track(None)]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn close_object_raises_critical_alert() {
        let mut alerter = ProximityAlerter::new();
        // relative_to_meters(20.0) = 5/20 = 0.25m, below CRITICAL_DISTANCE_M
        let alerts = alerter.check(&[track(Some(20.0))]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn notice_tier_requires_approaching_velocity() {
        let mut alerter = ProximityAlerter::new();
        // relative_to_meters(2.5) = 5/2.5 = 2.0m, within the notice band.
        let stationary = alerter.check(&[track_with_velocity(Some(2.5), (0.0, 0.0))]);
        assert!(stationary.is_empty());

        let mut alerter2 = ProximityAlerter::new();
        let approaching = alerter2.check(&[track_with_velocity(Some(2.5), (0.0, -8.0))]);
        assert_eq!(approaching.len(), 1);
        assert_eq!(approaching[0].severity, Severity::Notice);
    }

    #[test]
    fn cooldown_suppresses_repeat_alert_for_same_zone() {
        let mut alerter = ProximityAlerter::new();
        let alerts1 = alerter.check(&[track(Some(20.0))]);
        assert_eq!(alerts1.len(), 1);
        let alerts2 = alerter.check(&[track(Some(20.0))]);
        assert!(alerts2.is_empty());
    }
}
