//! C6 — perception pipeline.
//!
//! Orchestrates one frame through flow → ego-motion → detection/tracking →
//! trajectory prediction → proximity → ambient awareness, and reports
//! per-stage latencies for observability. Stateless across frames except for
//! the state owned by its internal flow/ego-motion/trajectory/ambient
//! instances — mirrors the single-owner pattern the audio pipeline used for
//! its VAD and model handles.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::vision::ambient::{AmbientAwareness, AmbientEvent, NoVitals, VitalsSource};
use crate::vision::detection::{Detection, Tracker, TrackedObject};
use crate::vision::ego_motion::{compensate_ego_motion, EgoMotion, EgoMotionEstimator};
use crate::vision::flow::{FlowEstimator, FlowResult};
use crate::vision::frame::Frame;
use crate::vision::proximity::{ProximityAlert, ProximityAlerter};
use crate::vision::shared;
use crate::vision::trajectory::{CollisionAlert, PredictedTrajectory, TrajectoryPredictor};

const FULL_RES_W: u32 = 320;
const FULL_RES_H: u32 = 240;

#[derive(Debug, Clone, Default)]
pub struct StageLatencies {
    pub flow: Duration,
    pub ego_motion: Duration,
    pub detection: Duration,
    pub trajectory: Duration,
    pub proximity: Duration,
    pub ambient: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub flow: FlowResult,
    pub ego_motion: EgoMotion,
    pub tracks: Vec<TrackedObject>,
    pub trajectories: Vec<PredictedTrajectory>,
    pub collisions: Vec<CollisionAlert>,
    pub proximity: Vec<ProximityAlert>,
    pub ambient_event: Option<AmbientEvent>,
    pub latencies: StageLatencies,
}

/// Owns per-frame algorithm state; the underlying camera/detector singletons
/// (C7) are process-wide and accessed through `vision::shared`.
pub struct PerceptionPipeline {
    flow: FlowEstimator,
    ego_motion: EgoMotionEstimator,
    tracker: Tracker,
    trajectory: TrajectoryPredictor,
    proximity: ProximityAlerter,
    ambient: AmbientAwareness,
    fps: f32,
}

impl Default for PerceptionPipeline {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl PerceptionPipeline {
    pub fn new(fps: f32) -> Self {
        Self {
            flow: FlowEstimator::new(),
            ego_motion: EgoMotionEstimator::default(),
            tracker: Tracker::new(),
            trajectory: TrajectoryPredictor::default(),
            proximity: ProximityAlerter::new(),
            ambient: AmbientAwareness::new(),
            fps,
        }
    }

    pub fn reset(&mut self) {
        self.flow.reset();
        self.ego_motion.invalidate_cache();
        self.tracker.reset();
        self.trajectory.reset();
        self.proximity.reset();
        self.ambient.reset();
    }

    /// Run one full-resolution perception step plus one ambient-awareness
    /// check on `frame`. `detections` comes from the external neural detector
    /// (already invoked by the caller, typically through
    /// [`shared::run_inference_shared`]) so callers may throttle or batch it.
    pub fn step(&mut self, frame: &Frame, detections: Vec<Detection>) -> PipelineResult {
        let total_start = Instant::now();
        let working = if frame.width == FULL_RES_W && frame.height == FULL_RES_H {
            frame.clone()
        } else {
            frame.downscale(FULL_RES_W, FULL_RES_H)
        };

        let t0 = Instant::now();
        let flow = self.flow.compute(&working);
        let flow_latency = t0.elapsed();

        let t1 = Instant::now();
        let ego_motion = self.ego_motion.estimate(&flow, working.width, working.height);
        let ego_latency = t1.elapsed();

        let t2 = Instant::now();
        let mut tracks = self.tracker.update(&detections).to_vec();
        let detection_latency = t2.elapsed();

        // Compensate each track's apparent velocity for camera ego-motion so
        // trajectory prediction and proximity alerting see independent
        // object motion rather than motion induced by the camera itself.
        let raw_flows: Vec<Option<(f32, f32)>> = tracks.iter().map(|t| Some(t.velocity)).collect();
        let compensated_flows = compensate_ego_motion(&raw_flows, &ego_motion);
        for (track, flow) in tracks.iter_mut().zip(compensated_flows) {
            track.flow = flow;
            if let Some(v) = flow {
                track.velocity = v;
            }
        }

        let t3 = Instant::now();
        let trajectories = self
            .trajectory
            .predict_all(&tracks, working.width, working.height, self.fps);
        let collisions = self.trajectory.build_alerts(&trajectories);
        let trajectory_latency = t3.elapsed();

        let t4 = Instant::now();
        let proximity = self.proximity.check(&tracks);
        let proximity_latency = t4.elapsed();

        let t5 = Instant::now();
        let ambient_event = self.ambient.check_frame(frame, &NoVitals);
        let ambient_latency = t5.elapsed();

        let total = total_start.elapsed();
        let latencies = StageLatencies {
            flow: flow_latency,
            ego_motion: ego_latency,
            detection: detection_latency,
            trajectory: trajectory_latency,
            proximity: proximity_latency,
            ambient: ambient_latency,
            total,
        };
        debug!(?latencies, "perception pipeline step");

        PipelineResult {
            flow,
            ego_motion,
            tracks,
            trajectories,
            collisions,
            proximity,
            ambient_event,
            latencies,
        }
    }

    /// Run one step, reading the frame from the shared camera (C7) and
    /// running the shared detector. Returns `None` when no frame is available.
    pub fn step_from_shared_camera(&mut self) -> Option<PipelineResult> {
        let frame = shared::read_frame()?;
        let detections = shared::run_inference_shared(&frame);
        Some(self.step(&frame, detections))
    }

    pub fn step_with_vitals(&mut self, frame: &Frame, vitals: &dyn VitalsSource) -> Option<AmbientEvent> {
        self.ambient.check_frame(frame, vitals)
    }
}
