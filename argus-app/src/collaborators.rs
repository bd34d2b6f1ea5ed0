//! Stub external collaborators — placeholder backends that let the full
//! perception/orchestration loop run end-to-end before real camera, neural
//! detector, STT, and TTS backends are wired in. Mirrors the core crate's
//! `inference::stub::StubModel` precedent: deterministic, observable
//! behavior standing in for hardware that isn't available on every host.

use argus_core::orchestrator::tools::StatsProvider;
use argus_core::orchestrator::{AudioPlayer, Tts};
use argus_core::vision::detection::{BBox, Detection};
use argus_core::vision::frame::Frame;
use argus_core::vision::shared::{Camera, Detector, FaceDetector};
use tracing::debug;

/// Synthetic camera producing a slowly drifting gray frame. Good enough to
/// exercise C1–C7 without real camera hardware.
pub struct StubCamera {
    width: u32,
    height: u32,
    tick: u32,
}

impl StubCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, tick: 0 }
    }
}

impl Camera for StubCamera {
    fn read(&mut self) -> Option<Frame> {
        self.tick = self.tick.wrapping_add(1);
        let base = 96u8.wrapping_add((self.tick % 8) as u8);
        let pixels = vec![base; (self.width * self.height * 3) as usize];
        Some(Frame::new(pixels, self.width, self.height))
    }
}

/// Detector stub reporting no detections — real object detection is out of
/// this crate's scope until an inference backend is selected.
pub struct StubDetector;

impl Detector for StubDetector {
    fn run(&mut self, _frame: &Frame) -> Vec<Detection> {
        Vec::new()
    }

    fn class_names(&self) -> &[(u32, String)] {
        &[]
    }
}

/// Always reports zero faces.
pub struct StubFaceDetector;

impl FaceDetector for StubFaceDetector {
    fn count_faces(&mut self, _frame: &Frame) -> usize {
        0
    }
}

pub struct NoopTts;
impl Tts for NoopTts {
    fn synthesize(&self, text: &str) -> Option<String> {
        debug!(chars = text.len(), "NoopTts: no speech backend configured");
        None
    }
}

pub struct NoopAudioPlayer;
impl AudioPlayer for NoopAudioPlayer {
    fn play(&self, _wav_path: &str) -> bool {
        false
    }
}

pub struct HostStats;
impl StatsProvider for HostStats {
    fn status_summary(&self) -> String {
        "vitals reporting is platform-specific and not configured on this host".to_string()
    }
}

/// Dummy bounding box used only by tests in this module.
#[allow(dead_code)]
fn sample_bbox() -> BBox {
    BBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_camera_always_returns_a_frame() {
        let mut cam = StubCamera::new(320, 240);
        for _ in 0..5 {
            let frame = cam.read().expect("stub camera should always produce a frame");
            assert_eq!(frame.width, 320);
            assert_eq!(frame.height, 240);
        }
    }

    #[test]
    fn stub_detector_reports_no_detections() {
        let mut det = StubDetector;
        let frame = Frame::new(vec![0u8; 3], 1, 1);
        assert!(det.run(&frame).is_empty());
    }
}
