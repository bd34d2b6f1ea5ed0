//! HTTP client for the external chat-model server.
//!
//! ## OOM ladder
//!
//! ```text
//! request(num_ctx=2048) ──fail(OOM)──► unload model, drop caches, sleep
//!         │                                    │
//!         └──────────────◄── retry at num_ctx=1024 ──► ... ──► num_ctx=512 ──► give up
//! ```
//!
//! All retry steps happen inside `chat_with_tools`; callers never see the
//! ladder, only the final content (possibly empty after exhaustion).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

const OOM_RETRY_NUM_CTX: &[u32] = &[2048, 1024, 512];
const OOM_PATTERNS: &[&str] = &[
    "allocate",
    "buffer",
    "failed to load model",
    "out of memory",
    "nvmapmemalloc",
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            tool_name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            tool_name: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_name: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_name: Some(tool_name.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub think: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            num_predict: 512,
            temperature: 0.7,
            think: false,
        }
    }
}

pub struct ChatClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client should always build"),
        }
    }

    pub async fn is_reachable(&self) -> bool {
        self.http
            .get(format!("{}/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn is_model_available(&self, model: &str) -> bool {
        let Ok(resp) = self.http.get(format!("{}/tags", self.base_url)).send().await else {
            return false;
        };
        let Ok(body) = resp.json::<Value>().await else {
            return false;
        };
        let wanted = model.trim_end_matches(":latest");
        body["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|m| {
                    let name = m["name"].as_str().unwrap_or("");
                    name == model || name.trim_end_matches(":latest") == wanted
                })
            })
            .unwrap_or(false)
    }

    /// Send one chat request without tools, no OOM retry.
    pub async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse> {
        self.chat_with_tools(messages, &[], options).await
    }

    /// Send a tool-augmented chat request with OOM-ladder retry.
    pub async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        let mut last_err: Option<CoreError> = None;

        for &num_ctx in OOM_RETRY_NUM_CTX {
            match self.send_once(messages, tools, options, num_ctx).await {
                Ok(resp) => return Ok(resp),
                Err(ChatSendError::Oom) => {
                    warn!(num_ctx, "chat request hit OOM — unloading model and retrying smaller");
                    self.unload_model().await;
                    drop_caches_best_effort();
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    last_err = Some(CoreError::ChatOomExhausted);
                    continue;
                }
                Err(ChatSendError::Other(e)) => {
                    return Err(e);
                }
            }
        }

        warn!("OOM retry ladder exhausted — returning empty response");
        let _ = last_err;
        Ok(ChatResponse::default())
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        options: &ChatOptions,
        num_ctx: u32,
    ) -> std::result::Result<ChatResponse, ChatSendError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "think": options.think,
            "tools": tools,
            "options": {
                "num_ctx": num_ctx,
                "num_predict": options.num_predict,
                "temperature": options.temperature,
            }
        });

        let resp = match self.http.post(format!("{}/chat", self.base_url)).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return Err(transport_error(e)),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => return Err(transport_error(e)),
        };

        if status.as_u16() == 500 && is_oom_error(&text) {
            return Err(ChatSendError::Oom);
        }
        if !status.is_success() {
            return Err(ChatSendError::Other(CoreError::ChatUnreachable(format!(
                "status {status}: {text}"
            ))));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| ChatSendError::Other(CoreError::Serde(e)))?;

        Ok(normalize_response(&parsed))
    }

    async fn unload_model(&self) {
        let body = json!({ "model": self.model, "keep_alive": 0 });
        if let Err(e) = self.http.post(format!("{}/chat", self.base_url)).json(&body).send().await {
            warn!(error = %e, "failed to unload model after OOM");
        } else {
            info!("model unloaded after OOM");
        }
    }
}

enum ChatSendError {
    Oom,
    Other(CoreError),
}

fn is_oom_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    OOM_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Map a transport-level `reqwest::Error` to an OOM send error when its
/// message resembles allocation failure (e.g. a connection reset while the
/// runtime is thrashing under memory pressure), otherwise to an unreachable
/// error.
fn transport_error(e: reqwest::Error) -> ChatSendError {
    let text = e.to_string();
    if is_oom_error(&text) {
        ChatSendError::Oom
    } else {
        ChatSendError::Other(CoreError::ChatUnreachable(text))
    }
}

#[cfg(target_os = "linux")]
fn drop_caches_best_effort() {
    let _ = std::process::Command::new("sudo")
        .args(["-n", "sh", "-c", "echo 3 > /proc/sys/vm/drop_caches"])
        .output();
}

#[cfg(not(target_os = "linux"))]
fn drop_caches_best_effort() {}

/// Extract content + tool calls from a raw chat-server response, applying
/// text-leak salvage and content cleaning.
fn normalize_response(parsed: &Value) -> ChatResponse {
    let message = &parsed["message"];
    let mut content = message["content"].as_str().unwrap_or("").to_string();

    let mut tool_calls = normalize_tool_calls(&message["tool_calls"]);

    if tool_calls.is_empty() {
        if let Some((extracted, remainder)) = extract_text_tool_calls(&content) {
            tool_calls = extracted;
            content = remainder;
        }
    }

    content = clean_llm_content(&content);

    ChatResponse { content, tool_calls }
}

fn normalize_tool_calls(value: &Value) -> Vec<ToolCall> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let func = &tc["function"];
            let name = func["name"].as_str()?.to_string();
            let arguments = match &func["arguments"] {
                Value::String(s) => serde_json::from_str(s).unwrap_or(json!({})),
                Value::Object(_) => func["arguments"].clone(),
                _ => json!({}),
            };
            Some(ToolCall { name, arguments })
        })
        .collect()
}

/// Salvage tool calls leaked into the textual content as a bare JSON object
/// with a `"name"` key, or an `Action: {...}` pattern.
fn extract_text_tool_calls(content: &str) -> Option<(Vec<ToolCall>, String)> {
    if let Some(idx) = content.find("Action:") {
        let after = &content[idx + "Action:".len()..];
        if let Some(json_start) = after.find('{') {
            if let Some(parsed) = parse_balanced_json(&after[json_start..]) {
                if let Some(name) = parsed["name"].as_str() {
                    let remainder = format!("{}{}", &content[..idx], after[..json_start].trim());
                    return Some((
                        vec![ToolCall {
                            name: name.to_string(),
                            arguments: parsed["arguments"].clone(),
                        }],
                        remainder,
                    ));
                }
            }
        }
    }

    if let Some(json_start) = content.find('{') {
        if let Some(parsed) = parse_balanced_json(&content[json_start..]) {
            if let Some(name) = parsed["name"].as_str() {
                let remainder = format!("{}{}", &content[..json_start], "");
                return Some((
                    vec![ToolCall {
                        name: name.to_string(),
                        arguments: parsed["arguments"].clone(),
                    }],
                    remainder,
                ));
            }
        }
    }

    None
}

fn parse_balanced_json(s: &str) -> Option<Value> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&s[..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip `<think>` blocks, fenced code, leaked JSON meta fragments, and
/// parenthetical meta-commentary. Returns "" if the remainder is too short
/// to be meaningful speech.
fn clean_llm_content(content: &str) -> String {
    let mut text = content.to_string();

    while let Some(start) = text.find("<think>") {
        if let Some(end) = text[start..].find("</think>") {
            text.replace_range(start..start + end + "</think>".len(), "");
        } else {
            text.truncate(start);
            break;
        }
    }

    let mut cleaned_lines = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('}') || trimmed.starts_with('[') {
            continue;
        }
        if trimmed.starts_with('(') && trimmed.ends_with(')') {
            continue;
        }
        cleaned_lines.push(line);
    }

    let result = cleaned_lines.join("\n").trim().to_string();
    if result.chars().count() < 3 {
        String::new()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_content_strips_think_blocks() {
        let raw = "<think>internal reasoning</think>Hello there.";
        assert_eq!(clean_llm_content(raw), "Hello there.");
    }

    #[test]
    fn clean_content_drops_short_remainder() {
        assert_eq!(clean_llm_content("ok"), "");
        assert_eq!(clean_llm_content(""), "");
    }

    #[test]
    fn clean_content_is_idempotent() {
        let raw = "<think>x</think>A proper reply that is long enough.";
        let once = clean_llm_content(raw);
        let twice = clean_llm_content(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_tool_calls_parses_stringified_arguments() {
        let value = json!([{
            "function": { "name": "tell_joke", "arguments": "{\"topic\": \"cats\"}" }
        }]);
        let calls = normalize_tool_calls(&value);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "tell_joke");
        assert_eq!(calls[0].arguments["topic"], "cats");
    }

    #[test]
    fn extract_text_tool_calls_salvages_action_pattern() {
        let content = "Sure! Action: {\"name\": \"tell_joke\", \"arguments\": {}}";
        let (calls, remainder) = extract_text_tool_calls(content).expect("should salvage");
        assert_eq!(calls[0].name, "tell_joke");
        assert!(remainder.contains("Sure!"));
    }

    #[test]
    fn is_oom_error_matches_known_patterns() {
        assert!(is_oom_error("failed to allocate buffer"));
        assert!(is_oom_error("CUDA out of memory"));
        assert!(!is_oom_error("invalid request"));
    }

    #[test]
    fn normalize_response_handles_missing_tool_calls_field() {
        let parsed = json!({ "message": { "content": "A complete reply here." } });
        let resp = normalize_response(&parsed);
        assert_eq!(resp.content, "A complete reply here.");
        assert!(resp.tool_calls.is_empty());
    }
}
