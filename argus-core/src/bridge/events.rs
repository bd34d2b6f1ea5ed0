//! Wire types for the observer protocol (C10).
//!
//! Every outbound message carries a bridge-wide strictly increasing `_seq`.
//! Mirrors the teacher's `ipc::events` conventions: `camelCase` fields,
//! `lowercase`/`snake_case` tags, round-trip tested.

use serde::{Deserialize, Serialize};

/// One phase within a single user turn, broadcast as it happens so observers
/// can render a live "thinking" trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStep {
    Heard,
    Vision,
    VisionDone,
    Context,
    Reasoning,
    Tool,
    ToolDone,
    Speaking,
    Done,
}

/// A compact detection summary suitable for the observer wire protocol —
/// deliberately thinner than [`crate::vision::detection::Detection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// Server → client message. `_seq` is assigned by the bridge at broadcast
/// time and is therefore not part of [`BroadcastPayload`] itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "_seq")]
    pub seq: u64,
    #[serde(flatten)]
    pub payload: BroadcastPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastPayload {
    Status { status: String },
    Reply { text: String },
    TranscriptFinal { text: String },
    TranscriptInterim { text: String },
    Detections { detections: Vec<DetectionSummary> },
    Error { message: String },
    Wake,
    Proactive { text: String },
    Hologram { data: serde_json::Value },
    Vitals { data: serde_json::Value },
    Threat { alerts: Vec<String> },
    ThinkingStep { step: ThinkingStep },
    ScanResult { description: String },
    SystemStatus { stats: String },
}

impl BroadcastPayload {
    /// The `type` tag value, sent on the wire.
    pub fn type_tag(&self) -> &'static str {
        match self {
            BroadcastPayload::Status { .. } => "status",
            BroadcastPayload::Reply { .. } => "reply",
            BroadcastPayload::TranscriptFinal { .. } => "transcript_final",
            BroadcastPayload::TranscriptInterim { .. } => "transcript_interim",
            BroadcastPayload::Detections { .. } => "detections",
            BroadcastPayload::Error { .. } => "error",
            BroadcastPayload::Wake => "wake",
            BroadcastPayload::Proactive { .. } => "proactive",
            BroadcastPayload::Hologram { .. } => "hologram",
            BroadcastPayload::Vitals { .. } => "vitals",
            BroadcastPayload::Threat { .. } => "threat",
            BroadcastPayload::ThinkingStep { .. } => "thinking_step",
            BroadcastPayload::ScanResult { .. } => "scan_result",
            BroadcastPayload::SystemStatus { .. } => "system_status",
        }
    }

    /// Rate-limit bucket key — per `(type, bridge)` pair, except
    /// `thinking_step`, which buckets per distinct step. A turn advances
    /// through nine different steps in quick succession and all of them must
    /// reach observers; only a duplicate of the *same* step within the
    /// interval (e.g. a retried broadcast) should be coalesced.
    pub fn rate_limit_key(&self) -> &'static str {
        match self {
            BroadcastPayload::ThinkingStep { step } => match step {
                ThinkingStep::Heard => "thinking_step:heard",
                ThinkingStep::Vision => "thinking_step:vision",
                ThinkingStep::VisionDone => "thinking_step:vision_done",
                ThinkingStep::Context => "thinking_step:context",
                ThinkingStep::Reasoning => "thinking_step:reasoning",
                ThinkingStep::Tool => "thinking_step:tool",
                ThinkingStep::ToolDone => "thinking_step:tool_done",
                ThinkingStep::Speaking => "thinking_step:speaking",
                ThinkingStep::Done => "thinking_step:done",
            },
            other => other.type_tag(),
        }
    }
}

/// Client → server message, per §6 Observer protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Text { text: String },
    SarcasmToggle,
    Scan,
    GetStatus,
    HologramRequest,
    VitalsRequest,
    StartListening,
    StopListening,
    Interrupt,
}

/// One item in the orchestrator's inbound query queue. Per REDESIGN FLAGS,
/// this tagged union replaces the original's `__ambient__{type}__{detail}`
/// sentinel string as the in-process representation; the sentinel remains
/// supported as the *wire*-level form produced by the wake-listener thread
/// and any external injector, parsed into this type at the queue boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryItem {
    UserText(String),
    AmbientEvent { event_type: String, detail: String },
}

const AMBIENT_SENTINEL_PREFIX: &str = "__ambient__";

impl QueryItem {
    /// Parse either a plain user utterance or an `__ambient__{type}__{detail}`
    /// sentinel string into the corresponding variant.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if let Some(rest) = raw.strip_prefix(AMBIENT_SENTINEL_PREFIX) {
            if let Some((event_type, detail)) = rest.split_once("__") {
                return QueryItem::AmbientEvent {
                    event_type: event_type.to_string(),
                    detail: detail.to_string(),
                };
            }
        }
        QueryItem::UserText(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_message_serializes_seq_and_type_tag() {
        let msg = BroadcastMessage {
            seq: 4,
            payload: BroadcastPayload::Status { status: "Listening".into() },
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["_seq"], 4);
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "Listening");
    }

    #[test]
    fn thinking_step_round_trips_snake_case() {
        let json = serde_json::to_value(ThinkingStep::VisionDone).unwrap();
        assert_eq!(json, "vision_done");
        let back: ThinkingStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, ThinkingStep::VisionDone);
    }

    #[test]
    fn client_message_parses_text_variant() {
        let raw = r#"{"type": "text", "text": "hello"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).expect("parse");
        match msg {
            ClientMessage::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_message_parses_unit_variant() {
        let raw = r#"{"type": "get_status"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).expect("parse");
        assert!(matches!(msg, ClientMessage::GetStatus));
    }

    #[test]
    fn query_item_parses_ambient_sentinel() {
        let item = QueryItem::from_wire("__ambient__motion_detected__energy 0.31");
        assert_eq!(
            item,
            QueryItem::AmbientEvent {
                event_type: "motion_detected".into(),
                detail: "energy 0.31".into(),
            }
        );
    }

    #[test]
    fn query_item_treats_plain_text_as_user_text() {
        let item = QueryItem::from_wire("what time is it");
        assert_eq!(item, QueryItem::UserText("what time is it".into()));
    }
}
