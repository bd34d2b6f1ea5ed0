//! C4 — ambient awareness state machine.
//!
//! A coarse, duty-cycled motion monitor: runs a downscaled flow pass at a
//! low rate while idle, ramps up the rate on any detected change, and
//! suppresses non-critical events during a cooldown window.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::vision::flow::{compute_motion_energy, FlowEstimator};
use crate::vision::frame::Frame;

const AMBIENT_RES_W: u32 = 160;
const AMBIENT_RES_H: u32 = 120;
const IDLE_HZ: f64 = 2.0;
const ACTIVE_HZ: f64 = 5.0;
const COOLDOWN_SEC: f64 = 10.0;
const ACTIVE_DURATION_SEC: f64 = 30.0;
const EGO_MOTION_THRESHOLD: f32 = 3.0;
const MOTION_ENERGY_THRESHOLD: f32 = 0.08;
const SCENE_CHANGE_THRESHOLD: f64 = 0.25;
const THERMAL_CHECK_INTERVAL_SEC: f64 = 30.0;
const THERMAL_THROTTLE_C: f64 = 70.0;
const THERMAL_PAUSE_C: f64 = 80.0;
const BATTERY_LOW_PCT: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientState {
    Idle,
    Active,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientEventType {
    MotionDetected,
    EgoMotionStart,
    EgoMotionStop,
    SceneChange,
    ThermalThrottle,
    BatteryLow,
}

#[derive(Debug, Clone)]
pub struct AmbientEvent {
    pub event_type: AmbientEventType,
    pub timestamp: Instant,
    pub motion_energy: f32,
    pub ego_speed: f32,
    pub detail: String,
    pub recommend_full_scan: bool,
}

/// Queried by the awareness loop for thermal/battery telemetry. External
/// collaborator — implementations live in the host binary.
pub trait VitalsSource: Send {
    fn temperature_c(&self) -> Option<f64>;
    fn battery_pct(&self) -> Option<u8>;
}

pub struct NoVitals;
impl VitalsSource for NoVitals {
    fn temperature_c(&self) -> Option<f64> {
        None
    }
    fn battery_pct(&self) -> Option<u8> {
        None
    }
}

pub struct AmbientAwareness {
    state: AmbientState,
    state_entered_at: Instant,
    flow: FlowEstimator,
    prev_mean_intensity: Option<f64>,
    last_ego_moving: bool,
    last_thermal_check: Option<Instant>,
}

impl Default for AmbientAwareness {
    fn default() -> Self {
        Self::new()
    }
}

impl AmbientAwareness {
    pub fn new() -> Self {
        Self {
            state: AmbientState::Idle,
            state_entered_at: Instant::now(),
            flow: FlowEstimator::new(),
            prev_mean_intensity: None,
            last_ego_moving: false,
            last_thermal_check: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> AmbientState {
        self.state
    }

    pub fn current_hz(&self) -> f64 {
        match self.state {
            AmbientState::Idle => IDLE_HZ,
            AmbientState::Active => ACTIVE_HZ,
            AmbientState::Cooldown => IDLE_HZ,
        }
    }

    pub fn interval_sec(&self) -> f64 {
        1.0 / self.current_hz()
    }

    pub fn enter_cooldown(&mut self) {
        self.transition(AmbientState::Cooldown);
    }

    fn transition(&mut self, new_state: AmbientState) {
        self.state = new_state;
        self.state_entered_at = Instant::now();
    }

    fn honor_timeouts(&mut self) {
        let elapsed = self.state_entered_at.elapsed().as_secs_f64();
        match self.state {
            AmbientState::Active if elapsed >= ACTIVE_DURATION_SEC => {
                self.transition(AmbientState::Idle);
            }
            AmbientState::Cooldown if elapsed >= COOLDOWN_SEC => {
                self.transition(AmbientState::Idle);
            }
            _ => {}
        }
    }

    /// Process one frame; returns at most one event, respecting the current
    /// duty cycle and cooldown suppression rules.
    pub fn check_frame(&mut self, frame: &Frame, vitals: &dyn VitalsSource) -> Option<AmbientEvent> {
        self.honor_timeouts();

        if let Some(event) = self.check_thermal_battery(vitals) {
            return Some(event);
        }

        let small = frame.downscale(AMBIENT_RES_W, AMBIENT_RES_H);
        let flow_result = self.flow.compute(&small);

        let mean_intensity = small.mean_intensity();
        let Some(prev) = self.prev_mean_intensity else {
            self.prev_mean_intensity = Some(mean_intensity);
            return None;
        };

        let motion_energy = compute_motion_energy(&flow_result, 1.0);
        let mean_mag = flow_result.mean_magnitude;
        let scene_delta = (mean_intensity - prev).abs() / mean_intensity.max(1.0);
        self.prev_mean_intensity = Some(mean_intensity);

        let ego_moving = mean_mag > EGO_MOTION_THRESHOLD;
        let ego_transitioned = ego_moving != self.last_ego_moving;
        self.last_ego_moving = ego_moving;

        let candidate = if ego_transitioned {
            Some((
                if ego_moving {
                    AmbientEventType::EgoMotionStart
                } else {
                    AmbientEventType::EgoMotionStop
                },
                format!("ego motion {}", if ego_moving { "started" } else { "stopped" }),
            ))
        } else if scene_delta > SCENE_CHANGE_THRESHOLD {
            Some((AmbientEventType::SceneChange, format!("scene changed by {:.2}", scene_delta)))
        } else if !ego_moving && motion_energy > MOTION_ENERGY_THRESHOLD {
            Some((AmbientEventType::MotionDetected, format!("motion energy {:.2}", motion_energy)))
        } else {
            None
        };

        let (event_type, detail) = candidate?;

        if self.state == AmbientState::Cooldown {
            return None;
        }

        self.transition(AmbientState::Active);

        Some(AmbientEvent {
            event_type,
            timestamp: Instant::now(),
            motion_energy,
            ego_speed: mean_mag,
            detail,
            recommend_full_scan: true,
        })
    }

    fn check_thermal_battery(&mut self, vitals: &dyn VitalsSource) -> Option<AmbientEvent> {
        let due = self
            .last_thermal_check
            .map(|t| t.elapsed() >= Duration::from_secs_f64(THERMAL_CHECK_INTERVAL_SEC))
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_thermal_check = Some(Instant::now());

        if let Some(temp) = vitals.temperature_c() {
            if temp >= THERMAL_THROTTLE_C {
                debug!(temp, "temperature above throttle threshold, not yet emitting");
            }
            if temp >= THERMAL_PAUSE_C {
                return Some(self.make_event(
                    AmbientEventType::ThermalThrottle,
                    format!("temperature {:.1}C at or above pause threshold", temp),
                ));
            }
        }
        if let Some(pct) = vitals.battery_pct() {
            if pct < BATTERY_LOW_PCT {
                return Some(self.make_event(
                    AmbientEventType::BatteryLow,
                    format!("battery at {}%", pct),
                ));
            }
        }
        None
    }

    fn make_event(&mut self, event_type: AmbientEventType, detail: String) -> AmbientEvent {
        // Thermal/battery events bypass COOLDOWN suppression; state still advances.
        self.transition(AmbientState::Active);
        AmbientEvent {
            event_type,
            timestamp: Instant::now(),
            motion_energy: 0.0,
            ego_speed: 0.0,
            detail,
            recommend_full_scan: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> Frame {
        Frame::new(vec![v; (w * h * 3) as usize], w, h)
    }

    #[test]
    fn identical_frames_emit_no_event() {
        let mut awareness = AmbientAwareness::new();
        let f = solid(320, 240, 100);
        assert!(awareness.check_frame(&f, &NoVitals).is_none());
        for _ in 0..5 {
            assert!(awareness.check_frame(&f, &NoVitals).is_none());
        }
        assert_eq!(awareness.state(), AmbientState::Idle);
    }

    #[test]
    fn cooldown_suppresses_motion_but_not_thermal() {
        let mut awareness = AmbientAwareness::new();
        awareness.enter_cooldown();
        let f = solid(320, 240, 100);
        assert!(awareness.check_frame(&f, &NoVitals).is_none());

        struct HotVitals;
        impl VitalsSource for HotVitals {
            fn temperature_c(&self) -> Option<f64> {
                Some(85.0)
            }
            fn battery_pct(&self) -> Option<u8> {
                None
            }
        }
        let mut awareness2 = AmbientAwareness::new();
        awareness2.enter_cooldown();
        let event = awareness2.check_frame(&f, &HotVitals);
        assert!(event.is_some());
        assert_eq!(event.unwrap().event_type, AmbientEventType::ThermalThrottle);
    }

    #[test]
    fn idle_hz_is_lower_than_active_hz() {
        let awareness = AmbientAwareness::new();
        assert_eq!(awareness.current_hz(), IDLE_HZ);
        assert!(IDLE_HZ < ACTIVE_HZ);
    }
}
