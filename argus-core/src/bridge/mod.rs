//! C10 — broadcast bridge.
//!
//! Owns the observer fan-out and the inbound query queue. Broadcasts go out
//! over a `tokio::sync::broadcast` channel, exactly the fan-out primitive the
//! teacher uses for its transcript/status/activity events, generalized from
//! three fixed channels to one tagged [`events::BroadcastMessage`] stream.

pub mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use events::{BroadcastMessage, BroadcastPayload, ClientMessage, QueryItem, ThinkingStep};

const OBSERVER_CHANNEL_CAPACITY: usize = 256;
const THINKING_STEP_MIN_INTERVAL_MS: u64 = 100;

/// Broadcast bridge. Cheaply `Clone`able; clones share the same observer set
/// and query queue.
#[derive(Clone)]
pub struct Bridge {
    tx: broadcast::Sender<BroadcastMessage>,
    seq: std::sync::Arc<AtomicU64>,
    query_tx: std::sync::Arc<Mutex<Option<mpsc::UnboundedSender<QueryItem>>>>,
    last_sent: std::sync::Arc<Mutex<HashMap<&'static str, Instant>>>,
    sarcasm: std::sync::Arc<AtomicBool>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(OBSERVER_CHANNEL_CAPACITY);
        Self {
            tx,
            seq: std::sync::Arc::new(AtomicU64::new(0)),
            query_tx: std::sync::Arc::new(Mutex::new(None)),
            last_sent: std::sync::Arc::new(Mutex::new(HashMap::new())),
            sarcasm: std::sync::Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register the orchestrator's inbound queue. Must be called exactly
    /// once before [`Bridge::inject_text`] or [`Bridge::handle_client_message`]
    /// are used; calling either before this is a programmer error.
    pub fn set_query_sender(&self, sender: mpsc::UnboundedSender<QueryItem>) {
        *self.query_tx.lock() = Some(sender);
    }

    /// Subscribe a new observer. The returned receiver is dropped (and thus
    /// "removed") whenever the observer's connection task ends.
    pub fn add_client(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn sarcasm_enabled(&self) -> bool {
        self.sarcasm.load(Ordering::Relaxed)
    }

    pub fn toggle_sarcasm(&self) -> bool {
        let new_value = !self.sarcasm.load(Ordering::Relaxed);
        self.sarcasm.store(new_value, Ordering::Relaxed);
        new_value
    }

    /// Assign `_seq` and send to every current observer. Rate-limits bursts
    /// of the same message type; a dropped message is logged at `debug`, not
    /// an error — this is an expected consequence of the limiter.
    pub fn broadcast(&self, payload: BroadcastPayload) {
        let tag = payload.type_tag();
        let bucket = payload.rate_limit_key();
        if tag == "thinking_step" && !self.rate_limit_ok(bucket) {
            debug!(tag, bucket, "dropped broadcast — rate limited");
            return;
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let message = BroadcastMessage { seq, payload };

        // broadcast::Sender::send only errors when there are zero receivers;
        // that is the expected steady state with no observers connected.
        let _ = self.tx.send(message);
    }

    /// Callable from any thread (including the wake-listener thread, which
    /// is not on the tokio runtime); cloning `Bridge` is cheap and `Send`.
    pub fn broadcast_threadsafe(&self, payload: BroadcastPayload) {
        self.broadcast(payload);
    }

    fn rate_limit_ok(&self, tag: &'static str) -> bool {
        let mut last_sent = self.last_sent.lock();
        let now = Instant::now();
        match last_sent.get(tag) {
            Some(prev) if now.duration_since(*prev) < Duration::from_millis(THINKING_STEP_MIN_INTERVAL_MS) => {
                false
            }
            _ => {
                last_sent.insert(tag, now);
                true
            }
        }
    }

    pub fn send_status(&self, status: impl Into<String>) {
        self.broadcast(BroadcastPayload::Status { status: status.into() });
    }

    pub fn send_reply(&self, text: impl Into<String>) {
        self.broadcast(BroadcastPayload::Reply { text: text.into() });
    }

    pub fn send_transcript_final(&self, text: impl Into<String>) {
        self.broadcast(BroadcastPayload::TranscriptFinal { text: text.into() });
    }

    pub fn send_transcript_interim(&self, text: impl Into<String>) {
        self.broadcast(BroadcastPayload::TranscriptInterim { text: text.into() });
    }

    pub fn send_detections(&self, detections: Vec<events::DetectionSummary>) {
        self.broadcast(BroadcastPayload::Detections { detections });
    }

    pub fn send_wake(&self) {
        self.broadcast(BroadcastPayload::Wake);
    }

    pub fn send_proactive(&self, text: impl Into<String>) {
        self.broadcast(BroadcastPayload::Proactive { text: text.into() });
    }

    pub fn send_hologram(&self, data: serde_json::Value) {
        self.broadcast(BroadcastPayload::Hologram { data });
    }

    pub fn send_vitals(&self, data: serde_json::Value) {
        self.broadcast(BroadcastPayload::Vitals { data });
    }

    pub fn send_threat(&self, alerts: Vec<String>) {
        self.broadcast(BroadcastPayload::Threat { alerts });
    }

    pub fn send_thinking_step(&self, step: ThinkingStep) {
        self.broadcast(BroadcastPayload::ThinkingStep { step });
    }

    pub fn send_error(&self, message: impl Into<String>) {
        self.broadcast(BroadcastPayload::Error { message: message.into() });
    }

    pub fn send_scan_result(&self, description: impl Into<String>) {
        self.broadcast(BroadcastPayload::ScanResult { description: description.into() });
    }

    pub fn send_system_status(&self, stats: impl Into<String>) {
        self.broadcast(BroadcastPayload::SystemStatus { stats: stats.into() });
    }

    /// Enqueue `text` as a query, routing it through [`QueryItem::from_wire`]
    /// so an `__ambient__{type}__{detail}` sentinel from an external injector
    /// (e.g. the wake listener) is recognized as an ambient event rather than
    /// literal user speech. Fatal if [`Bridge::set_query_sender`] was never
    /// called — that indicates incorrect startup order.
    pub fn inject_text(&self, text: impl Into<String>) -> Result<()> {
        self.enqueue(QueryItem::from_wire(text.into()))
    }

    pub fn inject_ambient(&self, event_type: impl Into<String>, detail: impl Into<String>) -> Result<()> {
        self.enqueue(QueryItem::AmbientEvent {
            event_type: event_type.into(),
            detail: detail.into(),
        })
    }

    fn enqueue(&self, item: QueryItem) -> Result<()> {
        let guard = self.query_tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                let _ = tx.send(item);
                Ok(())
            }
            None => Err(CoreError::QueueNotSet),
        }
    }

    /// Parse and dispatch one raw client message. Tool-producing branches
    /// (`scan`, `get_status`, `hologram_request`, `vitals_request`) are
    /// handled by the caller via the returned [`ClientCommand`] since they
    /// need access to the tool registry / pipeline, which the bridge itself
    /// does not own.
    pub fn handle_client_message(&self, raw: &str) -> ClientCommand {
        let parsed: std::result::Result<ClientMessage, _> = serde_json::from_str(raw);
        let msg = match parsed {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "ignoring malformed client message");
                return ClientCommand::Ignored;
            }
        };

        match msg {
            ClientMessage::Text { text } => {
                if let Err(e) = self.inject_text(text) {
                    self.send_error(e.to_string());
                }
                ClientCommand::Ignored
            }
            ClientMessage::SarcasmToggle => {
                let enabled = self.toggle_sarcasm();
                self.send_status(if enabled { "Sarcasm on" } else { "Sarcasm off" });
                ClientCommand::Ignored
            }
            ClientMessage::Scan => ClientCommand::Scan,
            ClientMessage::GetStatus => ClientCommand::GetStatus,
            ClientMessage::HologramRequest => ClientCommand::HologramRequest,
            ClientMessage::VitalsRequest => ClientCommand::VitalsRequest,
            ClientMessage::StartListening => ClientCommand::StartListening,
            ClientMessage::StopListening => ClientCommand::StopListening,
            ClientMessage::Interrupt => ClientCommand::Interrupt,
        }
    }
}

/// Client commands the bridge cannot fully service on its own and hands back
/// to the host for execution against collaborators it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Ignored,
    Scan,
    GetStatus,
    HologramRequest,
    VitalsRequest,
    StartListening,
    StopListening,
    Interrupt,
}
