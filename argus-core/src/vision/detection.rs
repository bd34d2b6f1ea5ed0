//! Detections from the external neural object detector, and the lightweight
//! IoU tracker that turns a per-frame detection list into stable tracks.

use std::time::Instant;

/// Axis-aligned bounding box in pixel coordinates, `(x1, y1, x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let iw = (ix2 - ix1).max(0.0);
        let ih = (iy2 - iy1).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One raw per-frame detection from the external detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
}

/// A stable object track maintained across frames.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub track_id: u64,
    pub bbox: BBox,
    pub class_id: u32,
    pub class_name: String,
    pub velocity: (f32, f32),
    pub frames_seen: u32,
    pub age_since_last_match: u32,
    pub last_seen: Instant,
    pub depth: Option<f32>,
    pub flow: Option<(f32, f32)>,
}

const MIN_IOU_FOR_MATCH: f32 = 0.3;
const MAX_AGE_BEFORE_RETIRE: u32 = 5;

/// Greedy IoU-based tracker (a lightweight ByteTrack-style assignment).
pub struct Tracker {
    tracks: Vec<TrackedObject>,
    next_id: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn active_tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    /// Associate `detections` with existing tracks, retiring stale ones and
    /// spawning new ones for unmatched detections. Returns the updated set.
    pub fn update(&mut self, detections: &[Detection]) -> &[TrackedObject] {
        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; detections.len()];

        // Build all candidate pairs above the IoU floor, highest first.
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= MIN_IOU_FOR_MATCH {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());

        for (ti, di, _) in pairs {
            if matched_tracks[ti] || matched_dets[di] {
                continue;
            }
            matched_tracks[ti] = true;
            matched_dets[di] = true;
            let det = &detections[di];
            let track = &mut self.tracks[ti];
            let (old_cx, old_cy) = track.bbox.center();
            let (new_cx, new_cy) = det.bbox.center();
            track.velocity = (new_cx - old_cx, new_cy - old_cy);
            track.bbox = det.bbox;
            track.class_id = det.class_id;
            track.class_name = det.class_name.clone();
            track.frames_seen += 1;
            track.age_since_last_match = 0;
            track.last_seen = Instant::now();
        }

        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].age_since_last_match += 1;
            }
        }
        self.tracks
            .retain(|t| t.age_since_last_match <= MAX_AGE_BEFORE_RETIRE);

        for (di, matched) in matched_dets.iter().enumerate() {
            if !matched {
                let det = &detections[di];
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(TrackedObject {
                    track_id: id,
                    bbox: det.bbox,
                    class_id: det.class_id,
                    class_name: det.class_name.clone(),
                    velocity: (0.0, 0.0),
                    frames_seen: 1,
                    age_since_last_match: 0,
                    last_seen: Instant::now(),
                    depth: None,
                    flow: None,
                });
            }
        }

        &self.tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox { x1, y1, x2, y2 }
    }

    fn det(bb: BBox) -> Detection {
        Detection {
            bbox: bb,
            confidence: 0.9,
            class_id: 0,
            class_name: "person".into(),
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(100.0, 100.0, 110.0, 110.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn first_detection_creates_a_new_track() {
        let mut tracker = Tracker::new();
        let tracks = tracker.update(&[det(bbox(0.0, 0.0, 10.0, 10.0))]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id, 0);
        assert_eq!(tracks[0].frames_seen, 1);
    }

    #[test]
    fn consistent_detection_reuses_track_id_and_updates_velocity() {
        let mut tracker = Tracker::new();
        tracker.update(&[det(bbox(0.0, 0.0, 10.0, 10.0))]);
        let tracks = tracker.update(&[det(bbox(5.0, 0.0, 15.0, 10.0))]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id, 0);
        assert_eq!(tracks[0].frames_seen, 2);
        assert!((tracks[0].velocity.0 - 5.0).abs() < 1e-5);
    }

    #[test]
    fn unmatched_track_is_retired_after_max_age() {
        let mut tracker = Tracker::new();
        tracker.update(&[det(bbox(0.0, 0.0, 10.0, 10.0))]);
        for _ in 0..MAX_AGE_BEFORE_RETIRE {
            let tracks = tracker.update(&[]);
            assert_eq!(tracks.len(), 1);
        }
        let tracks = tracker.update(&[]);
        assert!(tracks.is_empty());
    }
}
