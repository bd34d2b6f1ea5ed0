//! Turn-context assembly: system prompt, XML-tagged user message, and the
//! pure scene-change comparison used for proactive alerts.

use std::collections::HashSet;

use crate::chat::ChatMessage;

const BASE_SYSTEM_PROMPT: &str =
    "You are a perceptive on-device assistant. Be concise. Use tools when they help.";
const SARCASM_SUFFIX: &str = " Answer with a dry, sarcastic wit, but never at the cost of being useful.";

pub fn build_system_prompt(sarcasm_enabled: bool) -> String {
    if sarcasm_enabled {
        format!("{BASE_SYSTEM_PROMPT}{SARCASM_SUFFIX}")
    } else {
        BASE_SYSTEM_PROMPT.to_string()
    }
}

/// Keywords that mark a query as asking about the camera feed rather than
/// general conversation — gates whether the `vision`/`vision_done` thinking
/// steps are surfaced to observers for this turn.
const VISION_KEYWORDS: &[&str] = &[
    "see", "look", "vision", "camera", "view", "scene", "around you", "in front of you", "who is", "what's there",
];

/// Whether `raw_text` is asking about the camera feed, per §4.9 step 4's
/// "(if vision triggered)" qualifier on the `vision`/`vision_done` steps.
pub fn is_vision_triggered(raw_text: &str) -> bool {
    let lower = raw_text.to_lowercase();
    VISION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// One XML-tagged context block. Blocks whose value is `None` are omitted
/// from the assembled message entirely.
#[derive(Debug, Clone, Default)]
pub struct ContextBlocks {
    pub time: Option<String>,
    pub scene: Option<String>,
    pub sys: Option<String>,
    pub reminders: Option<String>,
    pub vitals: Option<String>,
    pub threat: Option<String>,
}

/// Assemble the final user message: context blocks in fixed order, followed
/// by the raw user text.
pub fn build_user_message(blocks: &ContextBlocks, raw_text: &str) -> String {
    let mut out = String::new();
    let tagged = [
        ("time", &blocks.time),
        ("scene", &blocks.scene),
        ("sys", &blocks.sys),
        ("reminders", &blocks.reminders),
        ("vitals", &blocks.vitals),
        ("threat", &blocks.threat),
    ];
    for (tag, value) in tagged {
        if let Some(v) = value {
            out.push_str(&format!("<{tag}>{v}</{tag}>\n"));
        }
    }
    out.push_str(raw_text);
    out
}

/// Replay recent short-term turns, tagging any prior vision-triggered
/// assistant content as `<history>...</history>` so the model can
/// distinguish live context from stale recollection.
pub fn render_history(history: &[ChatMessage], max_turns: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(max_turns);
    history[start..]
        .iter()
        .map(|m| {
            if m.role == "assistant" && m.content.contains("<scene>") {
                let mut tagged = m.clone();
                tagged.content = format!("<history>{}</history>", m.content);
                tagged
            } else {
                m.clone()
            }
        })
        .collect()
}

/// Snapshot of the scene used for proactive change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneState {
    pub person_count: usize,
    pub classes: HashSet<String>,
}

/// Pure comparison of two scene snapshots; returns at most one
/// natural-language alert, preferring the most salient change.
pub fn detect_scene_change(prev: &SceneState, curr: &SceneState) -> Option<String> {
    if prev.person_count == 0 && curr.person_count > 0 {
        return Some("Someone just entered the scene.".to_string());
    }
    if prev.person_count > 0 && curr.person_count == 0 {
        return Some("Everyone has left the scene.".to_string());
    }
    if curr.person_count > prev.person_count {
        return Some(format!(
            "{} more people entered the scene.",
            curr.person_count - prev.person_count
        ));
    }
    let new_classes: Vec<&String> = curr.classes.difference(&prev.classes).collect();
    if !new_classes.is_empty() {
        let names = new_classes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Some(format!("A new object appeared in view: {names}."));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_user_message_omits_absent_tags() {
        let blocks = ContextBlocks {
            time: Some("14:02".into()),
            scene: None,
            sys: None,
            reminders: None,
            vitals: None,
            threat: None,
        };
        let msg = build_user_message(&blocks, "what time is it");
        assert_eq!(msg, "<time>14:02</time>\nwhat time is it");
    }

    #[test]
    fn build_user_message_with_no_blocks_is_just_raw_text() {
        let msg = build_user_message(&ContextBlocks::default(), "hello");
        assert_eq!(msg, "hello");
    }

    #[test]
    fn sarcasm_suffix_only_applied_when_enabled() {
        assert!(!build_system_prompt(false).contains("sarcastic"));
        assert!(build_system_prompt(true).contains("sarcastic"));
    }

    #[test]
    fn vision_trigger_matches_camera_queries_not_small_talk() {
        assert!(is_vision_triggered("What do you see?"));
        assert!(is_vision_triggered("Who is in front of you"));
        assert!(!is_vision_triggered("What time is it?"));
        assert!(!is_vision_triggered("Tell me a joke"));
    }

    #[test]
    fn scene_change_detects_person_entered() {
        let prev = SceneState { person_count: 0, classes: HashSet::new() };
        let curr = SceneState { person_count: 1, classes: HashSet::new() };
        assert_eq!(detect_scene_change(&prev, &curr).unwrap(), "Someone just entered the scene.");
    }

    #[test]
    fn scene_change_detects_everyone_left() {
        let prev = SceneState { person_count: 2, classes: HashSet::new() };
        let curr = SceneState { person_count: 0, classes: HashSet::new() };
        assert_eq!(detect_scene_change(&prev, &curr).unwrap(), "Everyone has left the scene.");
    }

    #[test]
    fn scene_change_returns_none_when_unchanged() {
        let state = SceneState { person_count: 1, classes: HashSet::from(["dog".to_string()]) };
        assert!(detect_scene_change(&state, &state).is_none());
    }

    #[test]
    fn scene_change_detects_new_object_class() {
        let prev = SceneState { person_count: 1, classes: HashSet::new() };
        let mut classes = HashSet::new();
        classes.insert("bicycle".to_string());
        let curr = SceneState { person_count: 1, classes };
        assert!(detect_scene_change(&prev, &curr).unwrap().contains("bicycle"));
    }
}
