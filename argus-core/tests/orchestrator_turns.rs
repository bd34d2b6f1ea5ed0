//! End-to-end turn-loop scenarios (SPEC_FULL.md orchestrator examples),
//! driven against a hand-rolled single-route chat-server stub rather than a
//! mocking crate — the stub only needs to answer `/chat` with canned JSON.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use argus_core::bridge::events::{BroadcastPayload, ThinkingStep};
use argus_core::chat::ChatClient;
use argus_core::orchestrator::tools::ToolContext;
use argus_core::orchestrator::{NoAudioPlayer, NoTts, Orchestrator, OrchestratorConfig};
use argus_core::Bridge;

struct StubStats;
impl argus_core::orchestrator::tools::StatsProvider for StubStats {
    fn status_summary(&self) -> String {
        "uptime 1h, 512MB free".into()
    }
}

/// Spawns a one-route HTTP stub on `127.0.0.1:0` that pops a canned
/// `(status, body)` response off `responses` for every `/chat` call whose
/// body is a real turn request, and answers `keep_alive` unload pings with a
/// fixed 200 without consuming the queue. Returns the base URL to hand to
/// [`ChatClient::new`].
fn spawn_chat_stub(responses: Vec<(u16, &'static str)>) -> String {
    let queue = Arc::new(Mutex::new(responses.into_iter().collect::<VecDeque<_>>()));

    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    tokio::spawn(async move {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub listener");
        addr_tx.send(listener.local_addr().unwrap()).unwrap();

        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let body = loop {
                    let Ok(n) = socket.read(&mut chunk).await else { return };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf);
                    let Some(header_end) = text.find("\r\n\r\n") else { continue };
                    let content_length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    let body_so_far = buf.len().saturating_sub(header_end + 4);
                    if body_so_far >= content_length {
                        break String::from_utf8_lossy(&buf[header_end + 4..]).to_string();
                    }
                };

                let (status, payload) = if body.contains("\"keep_alive\"") {
                    (200u16, "{}".to_string())
                } else {
                    queue
                        .lock()
                        .pop_front()
                        .map(|(s, b)| (s, b.to_string()))
                        .unwrap_or((200, r#"{"message":{"content":"ok","tool_calls":[]}}"#.to_string()))
                };

                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    payload.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    let addr = addr_rx.recv().expect("stub never bound");
    format!("http://{addr}")
}

fn new_orchestrator(bridge: Bridge, base_url: String, reminders_path: std::path::PathBuf, session_path: std::path::PathBuf) -> Orchestrator {
    let chat = ChatClient::new(base_url, "test-model");
    let tool_ctx = Arc::new(ToolContext::new(bridge.clone(), reminders_path, Box::new(StubStats)));
    Orchestrator::new(
        bridge,
        chat,
        Arc::new(NoTts),
        Arc::new(NoAudioPlayer),
        tool_ctx,
        OrchestratorConfig::default(),
        session_path,
    )
}

async fn recv_until_done(rx: &mut tokio::sync::broadcast::Receiver<argus_core::bridge::events::BroadcastMessage>) -> Vec<BroadcastPayload> {
    let mut out = Vec::new();
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("turn did not complete in time")
            .expect("broadcast channel closed");
        let is_done = matches!(msg.payload, BroadcastPayload::ThinkingStep { step: ThinkingStep::Done });
        out.push(msg.payload);
        if is_done {
            // one more Status("Listening") follows Done
            let tail = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .expect("trailing status missing")
                .expect("broadcast channel closed");
            out.push(tail.payload);
            return out;
        }
    }
}

#[tokio::test]
async fn what_time_is_it_turn_matches_documented_broadcast_sequence() {
    let base_url = spawn_chat_stub(vec![(200, r#"{"message":{"content":"It's 10:42.","tool_calls":[]}}"#)]);
    let dir = std::env::temp_dir().join(format!("argus-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let bridge = Bridge::new();
    let mut rx = bridge.add_client();
    let orchestrator = new_orchestrator(
        bridge.clone(),
        base_url,
        dir.join("reminders_time.json"),
        dir.join("session_time.json"),
    );
    tokio::spawn(orchestrator.run());

    bridge.inject_text("what time is it").unwrap();
    let payloads = recv_until_done(&mut rx).await;

    let tags: Vec<&str> = payloads.iter().map(|p| p.type_tag()).collect();
    assert_eq!(
        tags,
        vec![
            "transcript_final",
            "thinking_step", // heard
            "thinking_step", // context
            "thinking_step", // reasoning
            "status",        // Thinking (LLM)
            "thinking_step", // speaking
            "status",        // Speaking
            "reply",
            "thinking_step", // done
            "status",        // Listening
        ]
    );

    match &payloads[8] {
        BroadcastPayload::ThinkingStep { step } => assert_eq!(*step, ThinkingStep::Done),
        other => panic!("expected done thinking step, got {other:?}"),
    }
    match &payloads[7] {
        BroadcastPayload::Reply { text } => assert!(!text.is_empty()),
        other => panic!("expected non-empty reply, got {other:?}"),
    }
}

#[tokio::test]
async fn vision_worded_query_includes_vision_steps_before_reasoning() {
    let base_url = spawn_chat_stub(vec![(
        200,
        r#"{"message":{"content":"I see a person at a desk, sir.","tool_calls":[]}}"#,
    )]);
    let dir = std::env::temp_dir().join(format!("argus-test-vision-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let bridge = Bridge::new();
    let mut rx = bridge.add_client();
    let orchestrator = new_orchestrator(
        bridge.clone(),
        base_url,
        dir.join("reminders_vision.json"),
        dir.join("session_vision.json"),
    );
    tokio::spawn(orchestrator.run());

    bridge.inject_text("What do you see?").unwrap();
    let payloads = recv_until_done(&mut rx).await;

    let steps: Vec<ThinkingStep> = payloads
        .iter()
        .filter_map(|p| match p {
            BroadcastPayload::ThinkingStep { step } => Some(*step),
            _ => None,
        })
        .collect();
    assert!(steps.contains(&ThinkingStep::Vision));
    assert!(steps.contains(&ThinkingStep::VisionDone));
    let vision_idx = steps.iter().position(|s| *s == ThinkingStep::Vision).unwrap();
    let reasoning_idx = steps.iter().position(|s| *s == ThinkingStep::Reasoning).unwrap();
    assert!(vision_idx < reasoning_idx);
}

#[tokio::test]
async fn joke_request_runs_tool_round_then_replies_from_second_round() {
    let base_url = spawn_chat_stub(vec![
        (
            200,
            r#"{"message":{"content":"","tool_calls":[{"function":{"name":"tell_joke","arguments":{}}}]}}"#,
        ),
        (200, r#"{"message":{"content":"Here's one: why do programmers prefer dark mode?","tool_calls":[]}}"#),
    ]);
    let dir = std::env::temp_dir().join(format!("argus-test-joke-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let bridge = Bridge::new();
    let mut rx = bridge.add_client();
    let orchestrator = new_orchestrator(
        bridge.clone(),
        base_url,
        dir.join("reminders_joke.json"),
        dir.join("session_joke.json"),
    );
    tokio::spawn(orchestrator.run());

    bridge.inject_text("tell me a joke").unwrap();
    let payloads = recv_until_done(&mut rx).await;

    let steps: Vec<ThinkingStep> = payloads
        .iter()
        .filter_map(|p| match p {
            BroadcastPayload::ThinkingStep { step } => Some(*step),
            _ => None,
        })
        .collect();
    assert!(steps.contains(&ThinkingStep::Tool));
    assert!(steps.contains(&ThinkingStep::ToolDone));
    let reasoning_idx = steps.iter().position(|s| *s == ThinkingStep::Reasoning).unwrap();
    let tool_idx = steps.iter().position(|s| *s == ThinkingStep::Tool).unwrap();
    let speaking_idx = steps.iter().position(|s| *s == ThinkingStep::Speaking).unwrap();
    assert!(reasoning_idx < tool_idx && tool_idx < speaking_idx);

    let reply = payloads.iter().find_map(|p| match p {
        BroadcastPayload::Reply { text } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(reply.as_deref(), Some("Here's one: why do programmers prefer dark mode?"));
}

#[tokio::test]
async fn oom_then_recovery_still_produces_a_reply() {
    let oom_body = r#"{"error":"failed to allocate buffer for model weights"}"#;
    let base_url = spawn_chat_stub(vec![
        (500, oom_body),
        (200, r#"{"message":{"content":"Back online now.","tool_calls":[]}}"#),
    ]);
    let dir = std::env::temp_dir().join(format!("argus-test-oom-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let bridge = Bridge::new();
    let mut rx = bridge.add_client();
    let orchestrator = new_orchestrator(
        bridge.clone(),
        base_url,
        dir.join("reminders_oom.json"),
        dir.join("session_oom.json"),
    );
    tokio::spawn(orchestrator.run());

    bridge.inject_text("hello there").unwrap();
    let payloads = recv_until_done(&mut rx).await;

    let reply = payloads.iter().find_map(|p| match p {
        BroadcastPayload::Reply { text } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(reply.as_deref(), Some("Back online now."));
}
