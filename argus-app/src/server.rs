//! Axum HTTP/WebSocket host for the observer protocol (C10) plus a small
//! REST surface for reminders CRUD. The teacher shipped as a Tauri desktop
//! app with an IPC event bus; this host exposes the same fan-out over a
//! plain WebSocket instead, since there is no desktop shell in this spec.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use argus_core::bridge::ClientCommand;
use argus_core::orchestrator::persist::Reminder;
use argus_core::orchestrator::tools::{run_tool, ToolContext};
use argus_core::Bridge;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub tool_ctx: Arc<ToolContext>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/reminders", get(list_reminders).post(create_reminder))
        .route("/reminders/:index/toggle", post(toggle_reminder))
        .route("/reminders/:index", delete(delete_reminder))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "observers": state.bridge.observer_count(),
    }))
}

async fn list_reminders(State(state): State<AppState>) -> impl IntoResponse {
    let reminders = state.tool_ctx.reminders.lock();
    Json(reminders.clone())
}

async fn create_reminder(
    State(state): State<AppState>,
    Json(body): Json<Reminder>,
) -> impl IntoResponse {
    state.tool_ctx.reminders.lock().push(body);
    persist(&state);
    axum::http::StatusCode::CREATED
}

async fn toggle_reminder(
    State(state): State<AppState>,
    AxumPath(index): AxumPath<usize>,
) -> impl IntoResponse {
    let result = {
        let mut reminders = state.tool_ctx.reminders.lock();
        argus_core::orchestrator::persist::toggle_reminder(&mut reminders, index)
    };
    match result {
        Ok(()) => {
            persist(&state);
            axum::http::StatusCode::OK
        }
        Err(_) => axum::http::StatusCode::NOT_FOUND,
    }
}

async fn delete_reminder(
    State(state): State<AppState>,
    AxumPath(index): AxumPath<usize>,
) -> impl IntoResponse {
    let result = {
        let mut reminders = state.tool_ctx.reminders.lock();
        argus_core::orchestrator::persist::delete_reminder(&mut reminders, index)
    };
    match result {
        Ok(_) => {
            persist(&state);
            axum::http::StatusCode::OK
        }
        Err(_) => axum::http::StatusCode::NOT_FOUND,
    }
}

fn persist(state: &AppState) {
    let reminders = state.tool_ctx.reminders.lock();
    if let Err(e) = argus_core::orchestrator::persist::save_reminders(&state.tool_ctx.reminders_path, &reminders) {
        warn!(error = %e, "failed to persist reminders after REST mutation");
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.bridge.add_client();

    let forward = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Ok(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    use futures_util::StreamExt;
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(raw) = msg {
            match state.bridge.handle_client_message(&raw) {
                ClientCommand::Scan => {
                    let ctx = state.tool_ctx.clone();
                    let bridge = state.bridge.clone();
                    tokio::task::spawn_blocking(move || {
                        let result = run_tool("vision_analyze", &serde_json::json!({}), &ctx);
                        bridge.send_scan_result(result);
                    });
                }
                ClientCommand::GetStatus => {
                    let ctx = state.tool_ctx.clone();
                    let bridge = state.bridge.clone();
                    tokio::task::spawn_blocking(move || {
                        let result = run_tool("get_status", &serde_json::json!({}), &ctx);
                        bridge.send_system_status(result);
                    });
                }
                ClientCommand::HologramRequest => {
                    state.bridge.send_hologram(json!({ "available": false }));
                }
                ClientCommand::VitalsRequest => {
                    state.bridge.send_vitals(json!({ "available": false }));
                }
                ClientCommand::StartListening | ClientCommand::StopListening | ClientCommand::Interrupt => {
                    debug!("listening-control client message acknowledged (no-op: no audio backend wired)");
                }
                ClientCommand::Ignored => {}
            }
        }
    }

    forward.abort();
}
