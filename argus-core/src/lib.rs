//! # argus-core
//!
//! Perception & orchestration core for an always-on voice+vision assistant.
//!
//! ## Architecture
//!
//! ```text
//! Camera ──► vision::shared (singleton) ──► vision::pipeline (spawn_blocking)
//!                                                  │
//!                                     flow → ego-motion → detector/tracker
//!                                                  │
//!                                 trajectory + proximity + ambient awareness
//!                                                  │
//!                                          broadcast::Sender<PerceptionEvent>
//!                                                  │
//! Wake word / STT ──► orchestrator (async turn loop) ──► chat::Client (OOM ladder)
//!                                                  │
//!                                          bridge (observer fan-out)
//! ```
//!
//! Heavy or blocking work (camera reads, detector inference, chat HTTP calls,
//! STT/TTS) never runs on the async event loop — it is pushed into
//! `spawn_blocking` tasks, mirroring the pipeline/event-loop split used
//! throughout this crate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod bridge;
pub mod chat;
pub mod error;
pub mod orchestrator;
pub mod vision;

// Convenience re-exports for downstream crates
pub use bridge::events::{BroadcastMessage, ThinkingStep};
pub use bridge::Bridge;
pub use chat::{ChatClient, ChatMessage};
pub use error::CoreError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use vision::frame::Frame;
pub use vision::pipeline::{PerceptionPipeline, PipelineResult};
