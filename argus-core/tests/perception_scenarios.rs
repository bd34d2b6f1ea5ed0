//! Perception pipeline scenarios from SPEC_FULL.md's worked examples that
//! don't need a chat server: the static-scene case lives as a unit test next
//! to `PerceptionPipeline`; this covers the moving-bar ambient-motion
//! detection case end to end through [`AmbientAwareness`].

use argus_core::vision::ambient::{AmbientAwareness, AmbientEventType, NoVitals};
use argus_core::vision::frame::Frame;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// A mostly-dark frame with a bright vertical bar at column `bar_x`,
/// sweeping across the frame over successive calls to simulate a moving
/// object crossing the field of view.
fn frame_with_bar(bar_x: u32) -> Frame {
    let mut data = vec![20u8; (WIDTH * HEIGHT * 3) as usize];
    let bar_width = 20;
    for y in 0..HEIGHT {
        for x in bar_x..(bar_x + bar_width).min(WIDTH) {
            let idx = ((y * WIDTH + x) * 3) as usize;
            data[idx..idx + 3].copy_from_slice(&[230, 230, 230]);
        }
    }
    Frame::new(data, WIDTH, HEIGHT)
}

#[test]
fn moving_bar_across_frames_eventually_triggers_an_ambient_event() {
    let mut awareness = AmbientAwareness::new();

    // Prime prev_mean_intensity with a first frame (first call never emits).
    assert!(awareness.check_frame(&frame_with_bar(0), &NoVitals).is_none());

    let mut triggered = false;
    for step in 1..=12u32 {
        let bar_x = (step * 20) % (WIDTH - 20);
        if let Some(event) = awareness.check_frame(&frame_with_bar(bar_x), &NoVitals) {
            assert!(matches!(
                event.event_type,
                AmbientEventType::MotionDetected | AmbientEventType::EgoMotionStart | AmbientEventType::SceneChange
            ));
            assert!(!event.detail.is_empty());
            triggered = true;
            break;
        }
    }

    assert!(triggered, "a sweeping bright bar across 12 frames should trip at least one ambient event");
}

#[test]
fn fully_static_frame_sequence_never_triggers_ambient_events() {
    let mut awareness = AmbientAwareness::new();
    let still = frame_with_bar(50);
    for _ in 0..15 {
        assert!(awareness.check_frame(&still, &NoVitals).is_none());
    }
}
