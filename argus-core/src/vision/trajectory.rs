//! C3 — trajectory predictor.
//!
//! Forecasts short-horizon waypoints per tracked object, classifies behavior
//! relative to the camera, and raises collision alerts for fast-approaching
//! objects. Mirrors the original system's `TrajectoryPredictor` constants
//! exactly (horizon, step count, collision zone, approach angle).

use std::collections::HashMap;

use crate::vision::detection::TrackedObject;
use crate::vision::ego_motion::{flow_to_velocity_mps, ASSUMED_HFOV_DEG};

const MIN_SPEED_PX_SEC: f32 = 5.0;
const VELOCITY_DAMPING: f32 = 0.3;
const DEFAULT_HORIZON_SEC: f32 = 3.0;
const DEFAULT_STEPS: usize = 6;
const DEFAULT_COLLISION_ZONE_M: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Stationary,
    Approaching,
    Receding,
    Crossing,
    Orbiting,
    Moving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Ahead,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Notice,
}

#[derive(Debug, Clone)]
pub struct PredictedTrajectory {
    pub track_id: u64,
    pub class_name: String,
    pub position: (f32, f32),
    pub velocity_px: (f32, f32),
    pub velocity_mps: Option<(f64, f64)>,
    pub depth_m: Option<f32>,
    pub waypoints: Vec<(f32, f32, f32)>,
    pub collision_risk: f32,
    pub time_to_collision: Option<f32>,
    pub collision_direction: Direction,
    pub behavior: Behavior,
}

#[derive(Debug, Clone)]
pub struct CollisionAlert {
    pub track_id: u64,
    pub class_name: String,
    pub speed_mps: f64,
    pub distance_m: f32,
    pub time_to_collision: f32,
    pub direction: Direction,
    pub severity: Severity,
    pub message: String,
}

pub struct TrajectoryPredictor {
    horizon_sec: f32,
    steps: usize,
    collision_zone_m: f32,
    prev_velocities: HashMap<u64, (f32, f32)>,
}

impl Default for TrajectoryPredictor {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON_SEC, DEFAULT_STEPS, DEFAULT_COLLISION_ZONE_M)
    }
}

impl TrajectoryPredictor {
    pub fn new(horizon_sec: f32, steps: usize, collision_zone_m: f32) -> Self {
        Self {
            horizon_sec,
            steps,
            collision_zone_m,
            prev_velocities: HashMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.prev_velocities.clear();
    }

    /// Predict trajectories for every currently tracked object, in one pass.
    /// Tracks absent from this call have their velocity-history entry dropped.
    pub fn predict_all(
        &mut self,
        tracks: &[TrackedObject],
        frame_w: u32,
        frame_h: u32,
        fps: f32,
    ) -> Vec<PredictedTrajectory> {
        let live_ids: std::collections::HashSet<u64> = tracks.iter().map(|t| t.track_id).collect();
        self.prev_velocities.retain(|id, _| live_ids.contains(id));

        let center = (frame_w as f32 / 2.0, frame_h as f32 / 2.0);
        let mut out = Vec::with_capacity(tracks.len());

        for track in tracks {
            let velocity_px = (track.velocity.0 * fps, track.velocity.1 * fps);
            let speed = (velocity_px.0 * velocity_px.0 + velocity_px.1 * velocity_px.1).sqrt();

            if speed < MIN_SPEED_PX_SEC {
                self.prev_velocities.insert(track.track_id, (0.0, 0.0));
                out.push(PredictedTrajectory {
                    track_id: track.track_id,
                    class_name: track.class_name.clone(),
                    position: track.bbox.center(),
                    velocity_px,
                    velocity_mps: None,
                    depth_m: track.depth.map(|d| d * 10.0),
                    waypoints: Vec::new(),
                    collision_risk: 0.0,
                    time_to_collision: None,
                    collision_direction: Direction::None,
                    behavior: Behavior::Stationary,
                });
                continue;
            }

            let prev_v = self
                .prev_velocities
                .get(&track.track_id)
                .copied()
                .unwrap_or(velocity_px);
            let accel = (
                (velocity_px.0 - prev_v.0) * VELOCITY_DAMPING,
                (velocity_px.1 - prev_v.1) * VELOCITY_DAMPING,
            );
            self.prev_velocities.insert(track.track_id, velocity_px);

            let position = track.bbox.center();
            let mut waypoints = Vec::with_capacity(self.steps);
            for k in 1..=self.steps {
                let t = (k as f32 / self.steps as f32) * self.horizon_sec;
                let x = position.0 + velocity_px.0 * t + 0.5 * accel.0 * t * t;
                let y = position.1 + velocity_px.1 * t + 0.5 * accel.1 * t * t;
                waypoints.push((x, y, t));
            }

            let to_camera = (center.0 - position.0, center.1 - position.1);
            let behavior = classify_behaviour(velocity_px, to_camera, position, center);

            let depth_m = track.depth.map(|d| d * 10.0);
            let velocity_mps = flow_to_velocity_mps(
                track.velocity.0,
                track.velocity.1,
                track.depth,
                fps,
                frame_w,
                ASSUMED_HFOV_DEG,
            )
            .map(|(vx, vy, _speed)| (vx, vy));

            let (collision_risk, ttc, direction) = if behavior == Behavior::Approaching {
                if let (Some(d), Some((vx, vy))) = (depth_m, velocity_mps) {
                    let speed_mps = (vx * vx + vy * vy).sqrt();
                    if speed_mps > 0.01 {
                        let ttc = d as f64 / speed_mps;
                        let risk = (self.collision_zone_m as f64 / d.max(0.1) as f64).min(1.0) as f32;
                        let dir = if position.0 < frame_w as f32 / 3.0 {
                            Direction::Left
                        } else if position.0 > 2.0 * frame_w as f32 / 3.0 {
                            Direction::Right
                        } else {
                            Direction::Ahead
                        };
                        (risk, Some(ttc as f32), dir)
                    } else {
                        (0.0, None, Direction::None)
                    }
                } else {
                    (0.0, None, Direction::None)
                }
            } else {
                (0.0, None, Direction::None)
            };

            out.push(PredictedTrajectory {
                track_id: track.track_id,
                class_name: track.class_name.clone(),
                position,
                velocity_px,
                velocity_mps,
                depth_m,
                waypoints,
                collision_risk,
                time_to_collision: ttc,
                collision_direction: direction,
                behavior,
            });
        }

        out
    }

    /// Build collision alerts for any predicted trajectory that crosses the
    /// severity thresholds. Mirrors `_build_alert` exactly.
    pub fn build_alerts(&self, predictions: &[PredictedTrajectory]) -> Vec<CollisionAlert> {
        predictions
            .iter()
            .filter_map(|p| {
                let ttc = p.time_to_collision?;
                if ttc >= self.horizon_sec || p.collision_risk <= 0.2 {
                    return None;
                }
                let distance_m = p.depth_m?;
                let (vx, vy) = p.velocity_mps?;
                let speed_mps = (vx * vx + vy * vy).sqrt();
                build_alert(p, speed_mps, distance_m, ttc)
            })
            .collect()
    }
}

fn classify_behaviour(
    velocity: (f32, f32),
    to_camera: (f32, f32),
    position: (f32, f32),
    center: (f32, f32),
) -> Behavior {
    let speed = (velocity.0 * velocity.0 + velocity.1 * velocity.1).sqrt();
    if speed < MIN_SPEED_PX_SEC {
        return Behavior::Stationary;
    }
    let to_camera_mag = (to_camera.0 * to_camera.0 + to_camera.1 * to_camera.1).sqrt();
    let to_camera_unit = if to_camera_mag > 1e-6 {
        (to_camera.0 / to_camera_mag, to_camera.1 / to_camera_mag)
    } else {
        (0.0, 0.0)
    };
    let dot = velocity.0 * to_camera_unit.0 + velocity.1 * to_camera_unit.1;
    let cross = velocity.0 * to_camera_unit.1 - velocity.1 * to_camera_unit.0;
    let near_center =
        (position.0 - center.0).abs() < 1.0 && (position.1 - center.1).abs() < 1.0;

    if near_center {
        Behavior::Orbiting
    } else if dot > 0.5 * speed {
        Behavior::Approaching
    } else if dot < -0.5 * speed {
        Behavior::Receding
    } else if cross.abs() > 0.5 * speed {
        Behavior::Crossing
    } else {
        Behavior::Moving
    }
}

fn build_alert(
    p: &PredictedTrajectory,
    speed_mps: f64,
    distance_m: f32,
    ttc: f32,
) -> Option<CollisionAlert> {
    let severity = if ttc < 1.0 && distance_m < 2.0 {
        Severity::Critical
    } else if ttc < 2.0 && distance_m < 4.0 {
        Severity::Warning
    } else if ttc < 3.0 {
        Severity::Notice
    } else {
        return None;
    };

    let dir_phrase = match p.collision_direction {
        Direction::Left => "approaching from the left",
        Direction::Right => "approaching from the right",
        Direction::Ahead => "approaching head-on",
        Direction::None => "approaching",
    };
    let speed_kmh = speed_mps * 3.6;
    let message = format!(
        "Sir, {} {} at {:.0} km/h — approximately {:.1} meters away, potential collision in {:.1} seconds.",
        p.class_name, dir_phrase, speed_kmh, distance_m, ttc
    );

    Some(CollisionAlert {
        track_id: p.track_id,
        class_name: p.class_name.clone(),
        speed_mps,
        distance_m,
        time_to_collision: ttc,
        direction: p.collision_direction,
        severity,
        message,
    })
}

pub fn format_trajectory_summary(predictions: &[PredictedTrajectory]) -> String {
    if predictions.is_empty() {
        return "No tracked objects.".to_string();
    }
    predictions
        .iter()
        .map(|p| format!("{} (id {}): {:?}", p.class_name, p.track_id, p.behavior))
        .collect::<Vec<_>>()
        .join("; ")
}
