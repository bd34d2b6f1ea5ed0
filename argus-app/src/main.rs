//! Argus host process entry point.
//!
//! Wires the perception pipeline (C1–C7), the orchestrator turn loop (C9),
//! and the observer broadcast bridge (C10) together, then serves the
//! bridge's HTTP/WebSocket surface. Stub camera/detector/TTS backends (see
//! `collaborators.rs`) stand in for hardware until real ones are selected.

mod collaborators;
mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argus_core::bridge::events::BroadcastPayload;
use argus_core::chat::ChatClient;
use argus_core::orchestrator::tools::ToolContext;
use argus_core::orchestrator::{Orchestrator, OrchestratorConfig};
use argus_core::vision::pipeline::PerceptionPipeline;
use argus_core::vision::shared;
use argus_core::Bridge;
use anyhow::Context;
use collaborators::{HostStats, NoopAudioPlayer, NoopTts, StubCamera, StubDetector, StubFaceDetector};
use config::{default_data_dir, load_settings, save_settings, Settings};
use tracing::info;

fn ambient_event_type_name(event_type: argus_core::vision::ambient::AmbientEventType) -> &'static str {
    use argus_core::vision::ambient::AmbientEventType::*;
    match event_type {
        MotionDetected => "motion_detected",
        EgoMotionStart => "ego_motion_start",
        EgoMotionStop => "ego_motion_stop",
        SceneChange => "scene_change",
        ThermalThrottle => "thermal_throttle",
        BatteryLow => "battery_low",
    }
}

/// Runs the per-frame perception pipeline on a dedicated blocking thread and
/// forwards its outputs onto the bridge and the orchestrator's inbound
/// queue, mirroring the teacher's split between the async event loop and
/// blocking inference work.
fn spawn_perception_loop(bridge: Bridge, settings: Settings) {
    std::thread::spawn(move || {
        let mut pipeline = PerceptionPipeline::new(settings.camera_fps);
        let frame_interval = Duration::from_secs_f32(1.0 / settings.camera_fps.max(1.0));

        loop {
            let Some(result) = pipeline.step_from_shared_camera() else {
                std::thread::sleep(frame_interval);
                continue;
            };

            if let Some(event) = result.ambient_event {
                let type_name = ambient_event_type_name(event.event_type);
                if let Err(e) = bridge.inject_ambient(type_name, event.detail.clone()) {
                    tracing::warn!(error = %e, "failed to enqueue ambient event");
                }
                bridge.send_status(format!("Ambient: {}", event.detail));
            }

            for alert in &result.collisions {
                bridge.send_threat(vec![alert.message.clone()]);
            }
            for alert in &result.proximity {
                bridge.send_threat(vec![alert.message.clone()]);
            }
            if !result.tracks.is_empty() {
                let detections = result
                    .tracks
                    .iter()
                    .map(|t| argus_core::bridge::events::DetectionSummary {
                        class_name: t.class_name.clone(),
                        confidence: 1.0,
                        bbox: [t.bbox.x1, t.bbox.y1, t.bbox.x2, t.bbox.y2],
                    })
                    .collect();
                bridge.send_detections(detections);
            }

            std::thread::sleep(frame_interval);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "argus=info".parse().unwrap()),
        )
        .init();

    info!("argus starting");

    let data_dir = default_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;
    let settings_path = data_dir.join("settings.json");
    let settings = load_settings(&settings_path);
    if let Err(e) = save_settings(&settings_path, &settings) {
        tracing::warn!(error = %e, "failed to persist normalized settings");
    }
    info!(bind_addr = %settings.bind_addr, chat_base_url = %settings.chat_base_url, "settings loaded");

    shared::set_camera_factory({
        let width = settings.camera_width;
        let height = settings.camera_height;
        move || Some(Box::new(StubCamera::new(width, height)) as Box<dyn shared::Camera>)
    });
    shared::set_detector_factory(|| Some(Box::new(StubDetector) as Box<dyn shared::Detector>));
    shared::set_face_detector_factory(|| Some(Box::new(StubFaceDetector) as Box<dyn shared::FaceDetector>));

    let bridge = Bridge::new();

    let reminders_path: PathBuf = data_dir.join("reminders.json");
    let session_path: PathBuf = data_dir.join("session.json");
    let tool_ctx = Arc::new(ToolContext::new(bridge.clone(), reminders_path, Box::new(HostStats)));

    let chat = ChatClient::new(settings.chat_base_url.clone(), settings.chat_model.clone());
    let orchestrator_config = OrchestratorConfig {
        max_tool_rounds: settings.max_tool_rounds,
        max_tool_calls_per_turn: settings.max_tool_calls_per_turn,
        proactive_idle_sec: settings.proactive_idle_sec,
        proactive_cooldown_sec: settings.proactive_cooldown_sec,
        ..OrchestratorConfig::default()
    };

    let orchestrator = Orchestrator::new(
        bridge.clone(),
        chat,
        Arc::new(NoopTts),
        Arc::new(NoopAudioPlayer),
        tool_ctx.clone(),
        orchestrator_config,
        session_path,
    );

    spawn_perception_loop(bridge.clone(), settings.clone());
    tokio::spawn(orchestrator.run());

    bridge.broadcast(BroadcastPayload::Status { status: "Listening".to_string() });

    let app_state = server::AppState { bridge, tool_ctx };
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding observer bridge listener on {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "observer bridge listening");
    axum::serve(listener, server::router(app_state))
        .await
        .context("observer bridge server exited")?;
    Ok(())
}
