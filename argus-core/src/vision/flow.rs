//! C1 — optical-flow estimator.
//!
//! Computes a dense, coarse flow field plus a sparse set of keypoint
//! correspondences between consecutive frames. The dense field feeds
//! [`crate::vision::ambient`]'s motion-energy gate; the sparse
//! correspondences feed [`crate::vision::ego_motion`]'s RANSAC fit.
//!
//! The estimator keeps no frame buffers beyond the previous one, and is not
//! thread-safe — each pipeline owns exactly one instance.

use crate::vision::frame::Frame;

/// Side length (px) of each block in the dense flow grid.
const BLOCK_SIZE: u32 = 16;
/// Maximum block displacement searched per axis, in pixels.
const SEARCH_RADIUS: i32 = 6;
/// Maximum sparse keypoints returned per call.
const MAX_KEYPOINTS: usize = 60;
/// Corner-response threshold (sum of absolute gradient in a 3x3 window).
const CORNER_THRESHOLD: u32 = 90;

/// A single 2-D displacement vector, in pixels, from the previous frame to the current one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowVector {
    pub dx: f32,
    pub dy: f32,
}

impl FlowVector {
    pub fn magnitude(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }
}

/// Output of one [`FlowEstimator::compute`] call.
#[derive(Debug, Clone, Default)]
pub struct FlowResult {
    /// Dense per-block flow, row-major, `grid_w * grid_h` long. `None` on the
    /// first frame after construction or `reset()`.
    pub dense: Option<Vec<FlowVector>>,
    pub grid_w: u32,
    pub grid_h: u32,
    /// Mean flow magnitude over all dense blocks. Zero when `dense` is `None`.
    pub mean_magnitude: f32,
    /// Sparse keypoint correspondences: `(x, y)` in the previous frame matched
    /// to `(x, y)` in the current frame, same length, same order.
    pub prev_points: Vec<(f32, f32)>,
    pub curr_points: Vec<(f32, f32)>,
}

impl FlowResult {
    pub fn is_first_frame(&self) -> bool {
        self.dense.is_none()
    }
}

/// Fraction of blocks whose magnitude exceeds `threshold`.
pub fn compute_motion_energy(result: &FlowResult, threshold: f32) -> f32 {
    let Some(dense) = &result.dense else {
        return 0.0;
    };
    if dense.is_empty() {
        return 0.0;
    }
    let above = dense.iter().filter(|v| v.magnitude() > threshold).count();
    above as f32 / dense.len() as f32
}

/// Block-matching dense flow plus a Moravec-style sparse corner tracker.
pub struct FlowEstimator {
    prev_gray: Option<Vec<u8>>,
    prev_w: u32,
    prev_h: u32,
}

impl Default for FlowEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowEstimator {
    pub fn new() -> Self {
        Self {
            prev_gray: None,
            prev_w: 0,
            prev_h: 0,
        }
    }

    pub fn reset(&mut self) {
        self.prev_gray = None;
    }

    /// Compute flow between the retained previous frame and `frame`.
    ///
    /// The first call after construction or `reset()` returns a `FlowResult`
    /// with `dense = None` and never fails.
    pub fn compute(&mut self, frame: &Frame) -> FlowResult {
        let gray = to_grayscale(frame);

        let Some(prev) = self.prev_gray.take() else {
            self.prev_gray = Some(gray);
            self.prev_w = frame.width;
            self.prev_h = frame.height;
            return FlowResult::default();
        };

        if self.prev_w != frame.width || self.prev_h != frame.height || gray.is_empty() {
            self.prev_gray = Some(gray);
            self.prev_w = frame.width;
            self.prev_h = frame.height;
            return FlowResult::default();
        }

        let (dense, grid_w, grid_h) =
            dense_block_flow(&prev, &gray, frame.width, frame.height);
        let mean_magnitude = if dense.is_empty() {
            0.0
        } else {
            dense.iter().map(FlowVector::magnitude).sum::<f32>() / dense.len() as f32
        };

        let (prev_points, curr_points) =
            sparse_corner_flow(&prev, &gray, frame.width, frame.height);

        self.prev_gray = Some(gray);
        self.prev_w = frame.width;
        self.prev_h = frame.height;

        FlowResult {
            dense: Some(dense),
            grid_w,
            grid_h,
            mean_magnitude,
            prev_points,
            curr_points,
        }
    }
}

fn to_grayscale(frame: &Frame) -> Vec<u8> {
    frame
        .data
        .chunks_exact(3)
        .map(|px| ((px[0] as u32 + px[1] as u32 + px[2] as u32) / 3) as u8)
        .collect()
}

fn sad(prev: &[u8], curr: &[u8], w: u32, h: u32, bx: u32, by: u32, bs: u32, ox: i32, oy: i32) -> u32 {
    let mut total = 0u32;
    for y in 0..bs {
        let py = by + y;
        let cy = py as i32 + oy;
        if cy < 0 || cy as u32 >= h {
            return u32::MAX;
        }
        for x in 0..bs {
            let px_ = bx + x;
            let cx = px_ as i32 + ox;
            if cx < 0 || cx as u32 >= w {
                return u32::MAX;
            }
            let p = prev[(py * w + px_) as usize] as i32;
            let c = curr[(cy as u32 * w + cx as u32) as usize] as i32;
            total += (p - c).unsigned_abs();
        }
    }
    total
}

fn dense_block_flow(prev: &[u8], curr: &[u8], w: u32, h: u32) -> (Vec<FlowVector>, u32, u32) {
    let grid_w = (w / BLOCK_SIZE).max(1);
    let grid_h = (h / BLOCK_SIZE).max(1);
    let mut out = Vec::with_capacity((grid_w * grid_h) as usize);

    for gy in 0..grid_h {
        for gx in 0..grid_w {
            let bx = gx * BLOCK_SIZE;
            let by = gy * BLOCK_SIZE;
            if bx + BLOCK_SIZE > w || by + BLOCK_SIZE > h {
                out.push(FlowVector { dx: 0.0, dy: 0.0 });
                continue;
            }
            let mut best = (0i32, 0i32, u32::MAX);
            for oy in -SEARCH_RADIUS..=SEARCH_RADIUS {
                for ox in -SEARCH_RADIUS..=SEARCH_RADIUS {
                    let cost = sad(prev, curr, w, h, bx, by, BLOCK_SIZE, ox, oy);
                    if cost < best.2 {
                        best = (ox, oy, cost);
                    }
                }
            }
            out.push(FlowVector {
                dx: best.0 as f32,
                dy: best.1 as f32,
            });
        }
    }
    (out, grid_w, grid_h)
}

/// Moravec corner response: sum of squared intensity differences in the four
/// axis-aligned directions over a 3x3 window, used as a cheap "cornerness" score.
fn corner_response(gray: &[u8], w: u32, h: u32, x: u32, y: u32) -> u32 {
    if x < 1 || y < 1 || x + 1 >= w || y + 1 >= h {
        return 0;
    }
    let at = |dx: i32, dy: i32| gray[((y as i32 + dy) as u32 * w + (x as i32 + dx) as u32) as usize] as i32;
    let center = at(0, 0);
    let dirs = [(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, -1)];
    dirs.iter()
        .map(|&(dx, dy)| (at(dx, dy) - center).unsigned_abs())
        .sum()
}

fn sparse_corner_flow(
    prev: &[u8],
    curr: &[u8],
    w: u32,
    h: u32,
) -> (Vec<(f32, f32)>, Vec<(f32, f32)>) {
    if w < 8 || h < 8 {
        return (Vec::new(), Vec::new());
    }
    let stride = 8u32;
    let mut candidates: Vec<(u32, u32, u32)> = Vec::new();
    for y in (1..h - 1).step_by(stride as usize) {
        for x in (1..w - 1).step_by(stride as usize) {
            let score = corner_response(prev, w, h, x, y);
            if score > CORNER_THRESHOLD {
                candidates.push((x, y, score));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.cmp(&a.2));
    candidates.truncate(MAX_KEYPOINTS);

    let mut prev_points = Vec::with_capacity(candidates.len());
    let mut curr_points = Vec::with_capacity(candidates.len());
    const WIN: i32 = 4;
    for (x, y, _) in candidates {
        let mut best = (0i32, 0i32, u32::MAX);
        for oy in -WIN..=WIN {
            for ox in -WIN..=WIN {
                let cost = sad(prev, curr, w, h, x.saturating_sub(2), y.saturating_sub(2), 4, ox, oy);
                if cost < best.2 {
                    best = (ox, oy, cost);
                }
            }
        }
        if best.2 != u32::MAX {
            prev_points.push((x as f32, y as f32));
            curr_points.push((x as f32 + best.0 as f32, y as f32 + best.1 as f32));
        }
    }
    (prev_points, curr_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; (w * h * 3) as usize], w, h)
    }

    #[test]
    fn first_call_returns_no_dense_flow() {
        let mut est = FlowEstimator::new();
        let f = solid_frame(64, 64, 100);
        let result = est.compute(&f);
        assert!(result.is_first_frame());
        assert_eq!(compute_motion_energy(&result, 1.0), 0.0);
    }

    #[test]
    fn identical_frames_have_zero_mean_magnitude() {
        let mut est = FlowEstimator::new();
        let f = solid_frame(64, 64, 100);
        est.compute(&f);
        let result = est.compute(&f);
        assert!(!result.is_first_frame());
        assert!((result.mean_magnitude).abs() < 1e-6);
    }

    #[test]
    fn reset_forgets_previous_frame() {
        let mut est = FlowEstimator::new();
        let f = solid_frame(32, 32, 50);
        est.compute(&f);
        est.reset();
        let result = est.compute(&f);
        assert!(result.is_first_frame());
    }

    #[test]
    fn shifted_bar_produces_nonzero_flow() {
        let mut est = FlowEstimator::new();
        let w = 64;
        let h = 64;
        let mut f1 = vec![20u8; (w * h * 3) as usize];
        for y in 20..40u32 {
            for x in 10..20u32 {
                let idx = ((y * w + x) * 3) as usize;
                f1[idx..idx + 3].copy_from_slice(&[220, 220, 220]);
            }
        }
        let mut f2 = vec![20u8; (w * h * 3) as usize];
        for y in 20..40u32 {
            for x in 18..28u32 {
                let idx = ((y * w + x) * 3) as usize;
                f2[idx..idx + 3].copy_from_slice(&[220, 220, 220]);
            }
        }
        est.compute(&Frame::new(f1, w, h));
        let result = est.compute(&Frame::new(f2, w, h));
        assert!(result.mean_magnitude > 0.0);
    }
}
