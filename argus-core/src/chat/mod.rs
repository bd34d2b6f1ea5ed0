//! C8 — chat client.
//!
//! HTTP client for the external chat-model server, with response
//! normalization (tool-call extraction, text-leak salvage, content
//! cleaning) and an OOM-ladder retry policy.

pub mod client;

pub use client::{ChatClient, ChatMessage, ChatOptions, ChatResponse, ToolCall};
