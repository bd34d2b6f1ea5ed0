//! Tool registry consumed by the turn loop (C9). Each tool takes a JSON
//! object of arguments and a [`ToolContext`] and returns a string result
//! that gets appended back into the chat as a `tool`-role message.

use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::orchestrator::persist::{self, Reminder};
use crate::vision::shared;

const JOKES: &[&str] = &[
    "I told my robot a joke about UDP. I'm not sure it got it.",
    "Parallel lines have so much in common. It's a shame they'll never meet.",
    "I'd tell you a joke about infinite loops, but I'd tell you a joke about infinite loops.",
    "Why do programmers prefer dark mode? Because light attracts bugs.",
];

/// Platform-neutral stats provider — generalized from the teacher's
/// Jetson-specific `jtop`/`tegrastats` integration, which is itself
/// out-of-scope hardware. Implementations live in the host binary.
pub trait StatsProvider: Send + Sync {
    fn status_summary(&self) -> String;
}

pub struct NoStats;
impl StatsProvider for NoStats {
    fn status_summary(&self) -> String {
        "status reporting unavailable on this host".to_string()
    }
}

pub struct ToolContext {
    pub bridge: Bridge,
    pub reminders_path: PathBuf,
    pub reminders: Mutex<Vec<Reminder>>,
    pub stats: Box<dyn StatsProvider>,
}

impl ToolContext {
    pub fn new(bridge: Bridge, reminders_path: PathBuf, stats: Box<dyn StatsProvider>) -> Self {
        let reminders = persist::load_reminders(&reminders_path).unwrap_or_default();
        Self {
            bridge,
            reminders_path,
            reminders: Mutex::new(reminders),
            stats,
        }
    }

    fn persist_reminders(&self) {
        let reminders = self.reminders.lock();
        if let Err(e) = persist::save_reminders(&self.reminders_path, &reminders) {
            tracing::warn!(error = %e, "failed to persist reminders");
        }
    }
}

/// Function-calling schemas in the chat server's expected shape.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "vision_analyze",
                "description": "Describe what the camera currently sees, optionally focused on one kind of object.",
                "parameters": {
                    "type": "object",
                    "properties": { "focus": { "type": "string", "description": "e.g. 'people', 'cars'" } },
                    "required": []
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "create_reminder",
                "description": "Create a reminder for later.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "time": { "type": "string", "description": "natural-language or ISO time" }
                    },
                    "required": ["text", "time"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "list_reminders",
                "description": "List all reminders and their status.",
                "parameters": { "type": "object", "properties": {} }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "tell_joke",
                "description": "Tell a short joke.",
                "parameters": { "type": "object", "properties": {} }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "toggle_sarcasm",
                "description": "Toggle sarcastic response mode on or off.",
                "parameters": { "type": "object", "properties": {} }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_status",
                "description": "Report current system status and vitals.",
                "parameters": { "type": "object", "properties": {} }
            }
        }),
    ]
}

/// Execute one tool call by name. Unknown tools and malformed arguments
/// degrade to a descriptive string rather than a fatal error, per §7's
/// "malformed external data" failure kind.
pub fn run_tool(name: &str, args: &Value, ctx: &ToolContext) -> String {
    match name {
        "vision_analyze" => {
            let focus = args.get("focus").and_then(Value::as_str);
            match shared::read_frame() {
                Some(frame) => shared::describe_current_scene(&frame, focus),
                None => "Vision temporarily unavailable.".to_string(),
            }
        }
        "create_reminder" => {
            let text = args.get("text").and_then(Value::as_str).unwrap_or("").to_string();
            let time = args.get("time").and_then(Value::as_str).unwrap_or("").to_string();
            if text.is_empty() || time.is_empty() {
                return "A reminder needs both text and time.".to_string();
            }
            ctx.reminders.lock().push(Reminder { text: text.clone(), time: time.clone(), done: false });
            ctx.persist_reminders();
            format!("Reminder set: \"{text}\" at {time}.")
        }
        "list_reminders" => {
            let reminders = ctx.reminders.lock();
            if reminders.is_empty() {
                return "You have no reminders.".to_string();
            }
            reminders
                .iter()
                .enumerate()
                .map(|(i, r)| format!("{}. {} at {} [{}]", i, r.text, r.time, if r.done { "done" } else { "pending" }))
                .collect::<Vec<_>>()
                .join("; ")
        }
        "tell_joke" => {
            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..JOKES.len());
            JOKES[idx].to_string()
        }
        "toggle_sarcasm" => {
            let enabled = ctx.bridge.toggle_sarcasm();
            format!("Sarcasm mode is now {}.", if enabled { "on" } else { "off" })
        }
        "get_status" => ctx.stats.status_summary(),
        other => format!("Unknown tool: {other}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;

    fn ctx() -> ToolContext {
        let mut path = std::env::temp_dir();
        path.push(format!("argus-core-tools-test-{:?}", std::thread::current().id()));
        let _ = std::fs::remove_file(&path);
        ToolContext::new(Bridge::new(), path, Box::new(NoStats))
    }

    #[test]
    fn create_then_list_reminder_round_trips() {
        let ctx = ctx();
        let out = run_tool("create_reminder", &json!({"text": "buy milk", "time": "tomorrow 9am"}), &ctx);
        assert!(out.contains("buy milk"));
        let listed = run_tool("list_reminders", &json!({}), &ctx);
        assert!(listed.contains("buy milk"));
    }

    #[test]
    fn create_reminder_rejects_missing_fields() {
        let ctx = ctx();
        let out = run_tool("create_reminder", &json!({"text": "buy milk"}), &ctx);
        assert!(out.contains("needs both"));
    }

    #[test]
    fn unknown_tool_is_reported_not_fatal() {
        let ctx = ctx();
        let out = run_tool("nonexistent", &json!({}), &ctx);
        assert!(out.contains("Unknown tool"));
    }

    #[test]
    fn toggle_sarcasm_flips_bridge_flag() {
        let ctx = ctx();
        assert!(!ctx.bridge.sarcasm_enabled());
        run_tool("toggle_sarcasm", &json!({}), &ctx);
        assert!(ctx.bridge.sarcasm_enabled());
    }

    #[test]
    fn tell_joke_returns_one_of_the_fixed_set() {
        let ctx = ctx();
        let out = run_tool("tell_joke", &json!({}), &ctx);
        assert!(JOKES.contains(&out.as_str()));
    }
}
