//! Extraction of user-authored text from raw transcript records.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const CONVERSATION_INFO_MARKER: &str = "Conversation info (untrusted metadata):";
pub const SENDER_INFO_MARKER: &str = "Sender (untrusted metadata):";
const FENCE: &str = "```";

#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<TranscriptMessage>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Value,
}

/// Parses one transcript line and returns the user utterance it carries.
///
/// Records that are not `type == "message"` with `role == "user"` yield
/// `Ok(None)`, as do user messages whose text is empty after extraction.
/// A line that is not valid JSON is an error.
pub fn extract_user_utterance(line: &str) -> Result<Option<String>> {
    let record = serde_json::from_str::<TranscriptRecord>(line)
        .context("failed to parse transcript record")?;
    if record.kind != "message" {
        return Ok(None);
    }
    let Some(message) = record.message else {
        return Ok(None);
    };
    if message.role != "user" {
        return Ok(None);
    }

    let text = strip_untrusted_metadata(&collect_text_segments(&message.content));
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(text))
}

/// Joins the non-empty `text` segments of a message content array with
/// newlines. Non-text segments and non-array content contribute nothing.
pub fn collect_text_segments(content: &Value) -> String {
    let Some(segments) = content.as_array() else {
        return String::new();
    };
    segments
        .iter()
        .filter(|segment| segment.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|segment| segment.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Drops the group metadata preamble the host prepends to user messages.
///
/// Only applies when both metadata markers are present; the user's own text is
/// whatever follows the last code fence. Without a fence, or with nothing
/// after it, the text is returned trimmed but otherwise untouched.
pub fn strip_untrusted_metadata(raw: &str) -> String {
    let text = raw.trim();
    if text.contains(CONVERSATION_INFO_MARKER) && text.contains(SENDER_INFO_MARKER) {
        if let Some(last_fence) = text.rfind(FENCE) {
            let after = text[last_fence + FENCE.len()..].trim();
            if !after.is_empty() {
                return after.to_string();
            }
        }
    }
    text.to_string()
}
