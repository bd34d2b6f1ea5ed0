//! Session and reminder persistence — plain JSON files, matching the
//! teacher's `serde_json::to_writer`/`from_reader` style rather than the
//! teacher's encrypted SQLite store (see DESIGN.md for why that was dropped).

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub short_term: Vec<ChatMessage>,
}

pub fn load_session(path: &Path) -> Result<SessionState> {
    if !path.exists() {
        return Ok(SessionState::default());
    }
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(CoreError::Serde)
}

pub fn save_session(path: &Path, state: &SessionState) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), state).map_err(CoreError::Serde)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub text: String,
    pub time: String,
    #[serde(default)]
    pub done: bool,
}

pub fn load_reminders(path: &Path) -> Result<Vec<Reminder>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(CoreError::Serde)
}

pub fn save_reminders(path: &Path, reminders: &[Reminder]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), reminders).map_err(CoreError::Serde)
}

pub fn toggle_reminder(reminders: &mut [Reminder], index: usize) -> Result<()> {
    let r = reminders.get_mut(index).ok_or(CoreError::ReminderNotFound(index))?;
    r.done = !r.done;
    Ok(())
}

pub fn delete_reminder(reminders: &mut Vec<Reminder>, index: usize) -> Result<Reminder> {
    if index >= reminders.len() {
        return Err(CoreError::ReminderNotFound(index));
    }
    Ok(reminders.remove(index))
}
