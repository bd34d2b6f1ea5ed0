//! C2 — ego-motion estimator.
//!
//! Decomposes a sparse flow correspondence set (from [`crate::vision::flow`])
//! into camera ego-motion versus independent object motion, with a small
//! result cache so a static scene does not re-run RANSAC every frame.

use nalgebra::{DMatrix, Matrix3, Matrix3x2, RowDVector, Vector3};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::vision::flow::FlowResult;

const MIN_POINTS: usize = 15;
const MOTION_THRESHOLD_PX: f32 = 1.5;
const WALKING_THRESHOLD_PX: f32 = 5.0;
const RANSAC_ITERATIONS: usize = 200;
const RANSAC_REPROJ_THRESHOLD: f64 = 2.0;
const CACHE_MAX_FRAMES: u8 = 3;
const CACHE_STATIC_INLIER_RATIO: f32 = 0.85;
pub const ASSUMED_HFOV_DEG: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionType {
    Static,
    Panning,
    Tilting,
    Walking,
    Moving,
}

#[derive(Debug, Clone)]
pub struct EgoMotion {
    pub ego_dx: f32,
    pub ego_dy: f32,
    pub yaw_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub roll_deg: Option<f64>,
    pub translation_dir: Option<Vector3<f64>>,
    pub is_moving: bool,
    pub motion_type: MotionType,
    pub inlier_ratio: f32,
    pub num_inliers: usize,
    pub num_points: usize,
}

impl EgoMotion {
    fn zero() -> Self {
        Self {
            ego_dx: 0.0,
            ego_dy: 0.0,
            yaw_deg: None,
            pitch_deg: None,
            roll_deg: None,
            translation_dir: None,
            is_moving: false,
            motion_type: MotionType::Static,
            inlier_ratio: 1.0,
            num_inliers: 0,
            num_points: 0,
        }
    }

    pub fn speed_px(&self) -> f32 {
        (self.ego_dx * self.ego_dx + self.ego_dy * self.ego_dy).sqrt()
    }
}

/// 60-degree-HFOV pinhole intrinsics approximation for a frame of the given size.
fn camera_matrix(width: u32, height: u32) -> Matrix3<f64> {
    let w = width as f64;
    let h = height as f64;
    let fx = w / (2.0 * (ASSUMED_HFOV_DEG.to_radians() / 2.0).tan());
    let fy = fx;
    Matrix3::new(fx, 0.0, w / 2.0, 0.0, fy, h / 2.0, 0.0, 0.0, 1.0)
}

struct EgoMotionCache {
    result: EgoMotion,
    ttl: u8,
}

/// Stateful estimator: retains a short-lived cache across `estimate` calls.
pub struct EgoMotionEstimator {
    cache: Option<EgoMotionCache>,
    skip_rotation: bool,
}

impl Default for EgoMotionEstimator {
    fn default() -> Self {
        Self::new(false)
    }
}

impl EgoMotionEstimator {
    pub fn new(skip_rotation: bool) -> Self {
        Self {
            cache: None,
            skip_rotation,
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    /// Estimate ego-motion from a flow result's sparse correspondences.
    pub fn estimate(&mut self, flow: &FlowResult, frame_w: u32, frame_h: u32) -> EgoMotion {
        let n = flow.prev_points.len();
        if n < MIN_POINTS {
            self.cache = None;
            return EgoMotion::zero();
        }

        let magnitudes: Vec<f32> = flow
            .prev_points
            .iter()
            .zip(&flow.curr_points)
            .map(|(p, c)| (((c.0 - p.0).powi(2) + (c.1 - p.1).powi(2)) as f32).sqrt())
            .collect();
        let mean_mag = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;

        if let Some(cached) = &mut self.cache {
            let same_side = (cached.result.speed_px() < MOTION_THRESHOLD_PX)
                == (mean_mag < MOTION_THRESHOLD_PX);
            if same_side && cached.ttl > 0 {
                cached.ttl -= 1;
                return cached.result.clone_with_points(n);
            }
        }

        if mean_mag < MOTION_THRESHOLD_PX {
            let result = EgoMotion {
                num_points: n,
                ..EgoMotion::zero()
            };
            self.store_if_static(result.clone());
            return result;
        }

        let (inliers, ego_dx, ego_dy) = ransac_fundamental(&flow.prev_points, &flow.curr_points);
        let inlier_ratio = if n == 0 {
            0.0
        } else {
            inliers.len() as f32 / n as f32
        };

        let (yaw_deg, pitch_deg, roll_deg, translation_dir) = if self.skip_rotation || inliers.len() < 9
        {
            (None, None, None, None)
        } else {
            decompose_rotation(&flow.prev_points, &flow.curr_points, &inliers, frame_w, frame_h)
        };

        let motion_type = classify_motion(ego_dx, ego_dy, mean_mag);
        let is_moving = (ego_dx * ego_dx + ego_dy * ego_dy).sqrt() >= MOTION_THRESHOLD_PX;

        let result = EgoMotion {
            ego_dx,
            ego_dy,
            yaw_deg,
            pitch_deg,
            roll_deg,
            translation_dir,
            is_moving,
            motion_type,
            inlier_ratio,
            num_inliers: inliers.len(),
            num_points: n,
        };

        self.store_if_static(result.clone());
        result
    }

    fn store_if_static(&mut self, result: EgoMotion) {
        if !result.is_moving && result.inlier_ratio >= CACHE_STATIC_INLIER_RATIO {
            self.cache = Some(EgoMotionCache {
                result,
                ttl: CACHE_MAX_FRAMES,
            });
        } else {
            self.cache = None;
        }
    }
}

impl EgoMotion {
    fn clone_with_points(&self, num_points: usize) -> EgoMotion {
        let mut c = self.clone();
        c.num_points = num_points;
        c
    }
}

fn classify_motion(ego_dx: f32, ego_dy: f32, mean_mag: f32) -> MotionType {
    if mean_mag < MOTION_THRESHOLD_PX {
        return MotionType::Static;
    }
    if ego_dx.abs() > 2.0 * ego_dy.abs() {
        MotionType::Panning
    } else if ego_dy.abs() > 2.0 * ego_dx.abs() {
        MotionType::Tilting
    } else if mean_mag > WALKING_THRESHOLD_PX {
        MotionType::Walking
    } else {
        MotionType::Moving
    }
}

/// RANSAC over a simple affine-translation model (never fails; degrades to the
/// median of all points when inliers can't be found). Returns `(inlier_indices, dx, dy)`.
fn ransac_fundamental(prev: &[(f32, f32)], curr: &[(f32, f32)]) -> (Vec<usize>, f32, f32) {
    let n = prev.len();
    let deltas: Vec<(f32, f32)> = prev
        .iter()
        .zip(curr)
        .map(|(p, c)| (c.0 - p.0, c.1 - p.1))
        .collect();

    let mut rng = thread_rng();
    let mut best_inliers: Vec<usize> = Vec::new();

    for _ in 0..RANSAC_ITERATIONS {
        let Some(&sample_idx) = (0..n).collect::<Vec<_>>().choose(&mut rng) else {
            break;
        };
        let hyp = deltas[sample_idx];
        let inliers: Vec<usize> = (0..n)
            .filter(|&i| {
                let dx = (deltas[i].0 - hyp.0) as f64;
                let dy = (deltas[i].1 - hyp.1) as f64;
                (dx * dx + dy * dy).sqrt() <= RANSAC_REPROJ_THRESHOLD
            })
            .collect();
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
        }
    }

    if best_inliers.len() < 4 {
        // Degenerate RANSAC fit — fall back to the median of all correspondences.
        let dx = median(&deltas.iter().map(|d| d.0).collect::<Vec<_>>());
        let dy = median(&deltas.iter().map(|d| d.1).collect::<Vec<_>>());
        return ((0..n).collect(), dx, dy);
    }

    let dx = median(&best_inliers.iter().map(|&i| deltas[i].0).collect::<Vec<_>>());
    let dy = median(&best_inliers.iter().map(|&i| deltas[i].1).collect::<Vec<_>>());
    (best_inliers, dx, dy)
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Essential-matrix decomposition over the inlier set, producing Euler angles
/// and a translation direction. Degenerate inputs return `None` fields upstream.
fn decompose_rotation(
    prev: &[(f32, f32)],
    curr: &[(f32, f32)],
    inliers: &[usize],
    frame_w: u32,
    frame_h: u32,
) -> (Option<f64>, Option<f64>, Option<f64>, Option<Vector3<f64>>) {
    let k = camera_matrix(frame_w, frame_h);
    let Some(k_inv) = k.try_inverse() else {
        return (None, None, None, None);
    };

    // Normalize the RANSAC inlier set into camera rays via K^-1, then run the
    // eight-point algorithm (needs >= 9 correspondences here, see the
    // `estimate` call site, so the DMatrix SVD below stays full rank on V).
    let pts: Vec<(Vector3<f64>, Vector3<f64>)> = inliers
        .iter()
        .map(|&i| {
            let p = k_inv * Vector3::new(prev[i].0 as f64, prev[i].1 as f64, 1.0);
            let c = k_inv * Vector3::new(curr[i].0 as f64, curr[i].1 as f64, 1.0);
            (p, c)
        })
        .collect();

    let Some(e) = estimate_essential_matrix(&pts) else {
        return (None, None, None, None);
    };
    let Some((r1, r2, t)) = decompose_essential(&e) else {
        return (None, None, None, None);
    };

    let candidates = [(r1, t), (r1, -t), (r2, t), (r2, -t)];
    let Some((r, t)) = candidates
        .into_iter()
        .max_by_key(|(r, t)| cheirality_votes(r, t, &pts))
    else {
        return (None, None, None, None);
    };

    let (yaw, pitch, roll) = euler_from_rotation(&r);
    let translation_dir = if t.norm() > 1e-9 { Some(t.normalize()) } else { None };

    (Some(yaw), Some(pitch), Some(roll), translation_dir)
}

/// Linear (8-point / Hartley) essential-matrix estimate from normalized ray
/// correspondences. Requires at least 9 points so nalgebra's economy SVD of
/// the `n x 9` design matrix keeps a full 9x9 right-singular basis — with
/// exactly 8 rows the smallest-singular-value column (our null-space
/// estimate) would be the one the economy decomposition drops.
fn estimate_essential_matrix(pts: &[(Vector3<f64>, Vector3<f64>)]) -> Option<Matrix3<f64>> {
    if pts.len() < 9 {
        return None;
    }
    let mut a = DMatrix::<f64>::zeros(pts.len(), 9);
    for (i, (p, c)) in pts.iter().enumerate() {
        let (x1, y1) = (p.x, p.y);
        let (x2, y2) = (c.x, c.y);
        a.set_row(
            i,
            &RowDVector::from_row_slice(&[
                x2 * x1, x2 * y1, x2, y2 * x1, y2 * y1, y2, x1, y1, 1.0,
            ]),
        );
    }

    let svd = nalgebra::linalg::SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let last = v_t.nrows() - 1;
    let e_raw = Matrix3::new(
        v_t[(last, 0)],
        v_t[(last, 1)],
        v_t[(last, 2)],
        v_t[(last, 3)],
        v_t[(last, 4)],
        v_t[(last, 5)],
        v_t[(last, 6)],
        v_t[(last, 7)],
        v_t[(last, 8)],
    );

    // Project onto the essential-matrix manifold: equal nonzero singular
    // values, smallest forced to zero.
    let svd_e = nalgebra::linalg::SVD::new(e_raw, true, true);
    let u = svd_e.u?;
    let v_t2 = svd_e.v_t?;
    let sigma = (svd_e.singular_values[0] + svd_e.singular_values[1]) / 2.0;
    let s = Matrix3::new(sigma, 0.0, 0.0, 0.0, sigma, 0.0, 0.0, 0.0, 0.0);
    Some(u * s * v_t2)
}

/// Standard `recoverPose`-style decomposition: `E = U diag(1,1,0) V^T`, then
/// `R in {U W V^T, U W^T V^T}` and `t = +-u3`, with `W` the 90-degree
/// rotation used to extract rotation from the SVD factors.
fn decompose_essential(e: &Matrix3<f64>) -> Option<(Matrix3<f64>, Matrix3<f64>, Vector3<f64>)> {
    let svd = nalgebra::linalg::SVD::new(*e, true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;
    if u.determinant() < 0.0 {
        for row in 0..3 {
            u[(row, 2)] = -u[(row, 2)];
        }
    }
    if v_t.determinant() < 0.0 {
        for col in 0..3 {
            v_t[(2, col)] = -v_t[(2, col)];
        }
    }
    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).into_owned();
    Some((r1, r2, t))
}

/// Counts correspondences with positive depth under both cameras for
/// candidate `(R, t)`, solving the two-ray intersection
/// `lambda1 * R x1 - lambda2 * x2 = -t` by least squares per point.
fn cheirality_votes(r: &Matrix3<f64>, t: &Vector3<f64>, pts: &[(Vector3<f64>, Vector3<f64>)]) -> usize {
    let mut votes = 0;
    for (p, c) in pts.iter().take(32) {
        let x1 = p.normalize();
        let x2 = c.normalize();
        let rx1 = r * x1;
        let a = Matrix3x2::new(rx1.x, -x2.x, rx1.y, -x2.y, rx1.z, -x2.z);
        let ata = a.transpose() * a;
        let Some(ata_inv) = ata.try_inverse() else {
            continue;
        };
        let lambda = ata_inv * (a.transpose() * (-t));
        if lambda.x > 0.0 && lambda.y > 0.0 {
            votes += 1;
        }
    }
    votes
}

fn euler_from_rotation(r: &Matrix3<f64>) -> (f64, f64, f64) {
    let pitch = (-r[(2, 0)]).asin().clamp(-1.0, 1.0).to_degrees();
    let yaw = r[(1, 0)].atan2(r[(0, 0)]).to_degrees();
    let roll = r[(2, 1)].atan2(r[(2, 2)]).to_degrees();
    (yaw, pitch, roll)
}

/// Subtract ego-motion from a set of per-object flow vectors. Short-circuits
/// and returns an unmodified copy when ego-motion is near zero.
pub fn compensate_ego_motion(flows: &[Option<(f32, f32)>], ego: &EgoMotion) -> Vec<Option<(f32, f32)>> {
    if ego.speed_px() < 0.01 {
        return flows.to_vec();
    }
    flows
        .iter()
        .map(|f| f.map(|(dx, dy)| (dx - ego.ego_dx, dy - ego.ego_dy)))
        .collect()
}

/// Project pixel-space flow + pseudo-metric relative depth to a velocity in m/s.
/// Returns `None` when depth is missing or effectively zero.
pub fn flow_to_velocity_mps(
    dx: f32,
    dy: f32,
    depth_relative: Option<f32>,
    fps: f32,
    frame_width: u32,
    hfov_deg: f64,
) -> Option<(f64, f64, f64)> {
    let depth_rel = depth_relative?;
    if depth_rel <= 0.01 {
        return None;
    }
    let depth_m = depth_rel as f64 * 10.0;
    let fx = frame_width as f64 / (2.0 * (hfov_deg.to_radians() / 2.0).tan());
    let vx = (dx as f64 / fx) * depth_m * fps as f64;
    let vy = (dy as f64 / fx) * depth_m * fps as f64;
    let speed = (vx * vx + vy * vy).sqrt();
    Some((vx, vy, speed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn synthetic_shift(n: usize, dx: f32, dy: f32) -> FlowResult {
        let mut prev_points = Vec::with_capacity(n);
        let mut curr_points = Vec::with_capacity(n);
        for i in 0..n {
            let x = (i % 20) as f32 * 10.0 + 5.0;
            let y = (i / 20) as f32 * 10.0 + 5.0;
            prev_points.push((x, y));
            curr_points.push((x + dx, y + dy));
        }
        FlowResult {
            dense: Some(vec![]),
            grid_w: 0,
            grid_h: 0,
            mean_magnitude: (dx * dx + dy * dy).sqrt(),
            prev_points,
            curr_points,
        }
    }

    #[test]
    fn too_few_points_returns_static_zero() {
        let mut est = EgoMotionEstimator::default();
        let flow = synthetic_shift(5, 10.0, 0.0);
        let result = est.estimate(&flow, 640, 480);
        assert!(!result.is_moving);
        assert_eq!(result.motion_type, MotionType::Static);
    }

    #[test]
    fn small_jitter_below_threshold_is_static() {
        let mut est = EgoMotionEstimator::default();
        let flow = synthetic_shift(30, 0.2, 0.1);
        let result = est.estimate(&flow, 640, 480);
        assert!(!result.is_moving);
    }

    #[test]
    fn lateral_shift_is_detected_as_moving_and_panning() {
        let mut est = EgoMotionEstimator::default();
        let flow = synthetic_shift(40, 8.0, 0.0);
        let result = est.estimate(&flow, 640, 480);
        assert!(result.is_moving);
        assert_eq!(result.motion_type, MotionType::Panning);
        assert_relative_eq!(result.ego_dx, 8.0, epsilon = 1.0);
    }

    #[test]
    fn compensate_ego_motion_is_noop_for_zero_ego() {
        let ego = EgoMotion::zero();
        let flows = vec![Some((3.0, 4.0)), None];
        let out = compensate_ego_motion(&flows, &ego);
        assert_eq!(out, flows);
    }

    #[test]
    fn flow_to_velocity_requires_depth() {
        assert!(flow_to_velocity_mps(1.0, 1.0, None, 30.0, 640, 60.0).is_none());
        assert!(flow_to_velocity_mps(1.0, 1.0, Some(0.5), 30.0, 640, 60.0).is_some());
    }
}
