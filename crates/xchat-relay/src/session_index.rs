use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

const GROUP_SESSION_MARKER: &str = ":telegram:group:";

#[derive(Debug, Clone, PartialEq, Eq)]
/// One relay-eligible group conversation.
pub struct ChatSession {
    pub chat_id: String,
    pub transcript_path: PathBuf,
    pub session_key: String,
}

impl ChatSession {
    pub fn reply_to(&self) -> String {
        reply_target_for(&self.chat_id)
    }
}

pub fn reply_target_for(chat_id: &str) -> String {
    format!("telegram:group:{chat_id}")
}

/// Extracts group sessions from a parsed session index, ordered by key.
pub fn parse_group_sessions(index: &Value) -> Vec<ChatSession> {
    let Some(entries) = index.as_object() else {
        return Vec::new();
    };
    let mut sessions = entries
        .iter()
        .filter(|(key, _)| key.contains(GROUP_SESSION_MARKER))
        .filter_map(|(key, entry)| {
            let transcript_path = entry.get("sessionFile")?.as_str()?;
            if transcript_path.is_empty() {
                return None;
            }
            let chat_id = key.rsplit(':').next()?;
            if chat_id.is_empty() {
                return None;
            }
            Some(ChatSession {
                chat_id: chat_id.to_string(),
                transcript_path: PathBuf::from(transcript_path),
                session_key: key.clone(),
            })
        })
        .collect::<Vec<_>>();
    sessions.sort_by(|left, right| left.session_key.cmp(&right.session_key));
    sessions
}

/// Reads the session index at `path`. An index without group sessions is an
/// error.
pub fn discover_group_sessions(path: &Path) -> Result<Vec<ChatSession>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read session index {}", path.display()))?;
    let index = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse session index {}", path.display()))?;
    let sessions = parse_group_sessions(&index);
    if sessions.is_empty() {
        bail!(
            "no telegram group sessions found in session index {}",
            path.display()
        );
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use tempfile::tempdir;

    use super::{discover_group_sessions, parse_group_sessions};

    #[test]
    fn unit_parse_group_sessions_filters_and_orders_entries() {
        let index = json!({
            "agent:main:telegram:group:-200": {"sessionFile": "/tmp/b.jsonl"},
            "agent:main:telegram:dm:42": {"sessionFile": "/tmp/dm.jsonl"},
            "agent:main:telegram:group:-100": {"sessionFile": "/tmp/a.jsonl"},
            "agent:main:telegram:group:-300": {"sessionFile": 7},
            "agent:main:telegram:group:": {"sessionFile": "/tmp/empty.jsonl"},
            "agent:main:telegram:group:-400": {}
        });
        let sessions = parse_group_sessions(&index);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].chat_id, "-100");
        assert_eq!(sessions[0].session_key, "agent:main:telegram:group:-100");
        assert_eq!(sessions[0].transcript_path, PathBuf::from("/tmp/a.jsonl"));
        assert_eq!(sessions[0].reply_to(), "telegram:group:-100");
        assert_eq!(sessions[1].chat_id, "-200");
    }

    #[test]
    fn functional_discover_group_sessions_reads_index_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sessions.json");
        std::fs::write(
            &path,
            r#"{"agent:main:telegram:group:-100":{"sessionFile":"/tmp/a.jsonl"}}"#,
        )
        .expect("write index");
        let sessions = discover_group_sessions(&path).expect("discover");
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn regression_discover_group_sessions_rejects_empty_and_missing_index() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sessions.json");
        let missing = discover_group_sessions(&path).expect_err("missing index");
        assert!(missing.to_string().contains("failed to read session index"));

        std::fs::write(&path, r#"{"agent:main:main":{"sessionFile":"/tmp/m.jsonl"}}"#)
            .expect("write index");
        let empty = discover_group_sessions(&path).expect_err("no group sessions");
        assert!(empty.to_string().contains("no telegram group sessions"));
    }
}
