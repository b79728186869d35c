use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use xchat_core::write_text_atomic;

use crate::relay_limits::RelayLimits;

const MIN_ROUNDS: u8 = 1;
const MAX_ROUNDS: u8 = 3;
const FALLBACK_COOLDOWN_MS: u64 = 8_000;

/// Clamps any requested round count into the supported `1..=3` range.
pub fn clamp_rounds(rounds: i64) -> u8 {
    rounds.clamp(i64::from(MIN_ROUNDS), i64::from(MAX_ROUNDS)) as u8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    #[default]
    Duo,
    Trio,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duo => "duo",
            Self::Trio => "trio",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Last textual output of each backend. Older snapshots used per-bot key
/// names; those are still accepted on load.
pub struct BridgeContext {
    #[serde(
        rename = "lastA",
        alias = "lastDeepseek",
        default,
        deserialize_with = "null_as_default"
    )]
    pub last_a: String,
    #[serde(
        rename = "lastB",
        alias = "lastGlm",
        default,
        deserialize_with = "null_as_default"
    )]
    pub last_b: String,
    #[serde(
        rename = "lastC",
        alias = "lastOpenclaw",
        default,
        deserialize_with = "null_as_default"
    )]
    pub last_c: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mode: RelayMode,
    #[serde(default = "default_rounds", deserialize_with = "deserialize_rounds")]
    pub rounds: u8,
    #[serde(
        default = "default_cooldown_ms",
        deserialize_with = "deserialize_cooldown_ms"
    )]
    pub cooldown_ms: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_trigger_at: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bridge: BridgeContext,
}

impl ChatState {
    pub fn with_limits(limits: &RelayLimits) -> Self {
        Self {
            enabled: false,
            mode: RelayMode::Duo,
            rounds: clamp_rounds(i64::from(limits.default_rounds)),
            cooldown_ms: limits.cooldown_ms,
            last_trigger_at: 0,
            bridge: BridgeContext::default(),
        }
    }
}

fn default_rounds() -> u8 {
    MIN_ROUNDS
}

fn default_cooldown_ms() -> u64 {
    FALLBACK_COOLDOWN_MS
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_rounds<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?
        .map(clamp_rounds)
        .unwrap_or(MIN_ROUNDS))
}

fn deserialize_cooldown_ms<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(FALLBACK_COOLDOWN_MS))
}

#[derive(Debug, Clone, Default, Serialize)]
struct RelayStateFile {
    chats: BTreeMap<String, ChatState>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelayStateFile {
    #[serde(default, deserialize_with = "null_as_default")]
    chats: BTreeMap<String, Value>,
}

/// Decodes the snapshot one chat record at a time. A record that does not
/// decode is dropped with a warning; the remaining chats are kept.
fn decode_state_file(raw: &str, path: &Path) -> serde_json::Result<RelayStateFile> {
    let raw_state = serde_json::from_str::<RawRelayStateFile>(raw)?;
    let mut chats = BTreeMap::new();
    for (chat_id, record) in raw_state.chats {
        match serde_json::from_value::<ChatState>(record) {
            Ok(state) => {
                chats.insert(chat_id, state);
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    chat_id = %chat_id,
                    error = %error,
                    reason_code = "relay_state_corrupt",
                    "dropping undecodable chat state record"
                );
            }
        }
    }
    Ok(RelayStateFile { chats })
}

/// Durable per-chat relay records, rewritten in full on every save.
pub struct ChatStateStore {
    path: PathBuf,
    limits: RelayLimits,
    state: RelayStateFile,
}

impl ChatStateStore {
    /// Loads the snapshot at `path`. A missing, unreadable or corrupt file
    /// yields an empty store.
    pub fn load(path: PathBuf, limits: RelayLimits) -> Self {
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match decode_state_file(&raw, &path) {
                Ok(state) => state,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        reason_code = "relay_state_corrupt",
                        "chat state snapshot is corrupt; starting empty"
                    );
                    RelayStateFile::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no chat state snapshot yet");
                RelayStateFile::default()
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    reason_code = "relay_state_unreadable",
                    "chat state snapshot unreadable; starting empty"
                );
                RelayStateFile::default()
            }
        };
        Self {
            path,
            limits,
            state,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.chats.is_empty()
    }

    pub fn get(&self, chat_id: &str) -> Option<&ChatState> {
        self.state.chats.get(chat_id)
    }

    /// Returns the record for `chat_id`, creating it from the configured
    /// defaults when absent and re-clamping `rounds` on existing records.
    pub fn ensure(&mut self, chat_id: &str) -> &mut ChatState {
        let limits = self.limits;
        let state = self
            .state
            .chats
            .entry(chat_id.to_string())
            .or_insert_with(|| ChatState::with_limits(&limits));
        state.rounds = clamp_rounds(i64::from(state.rounds));
        state
    }

    pub fn save(&self) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(&self.state).context("failed to serialize chat state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write chat state {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Clone)]
/// [`ChatStateStore`] shared between a chat's line handler and its spawned
/// scheduler runs. The lock is only ever held for synchronous sections.
pub struct SharedChatStateStore {
    inner: Arc<Mutex<ChatStateStore>>,
}

impl SharedChatStateStore {
    pub fn new(store: ChatStateStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChatStateStore>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("chat state store lock is poisoned"))
    }

    /// Ensures a record exists for `chat_id` and persists the snapshot.
    pub fn register(&self, chat_id: &str) -> Result<ChatState> {
        let mut store = self.lock()?;
        let snapshot = store.ensure(chat_id).clone();
        store.save()?;
        Ok(snapshot)
    }

    pub fn snapshot(&self, chat_id: &str) -> Result<ChatState> {
        let mut store = self.lock()?;
        Ok(store.ensure(chat_id).clone())
    }

    /// Runs `apply` against the chat record without persisting.
    pub fn with_chat<R>(&self, chat_id: &str, apply: impl FnOnce(&mut ChatState) -> R) -> Result<R> {
        let mut store = self.lock()?;
        Ok(apply(store.ensure(chat_id)))
    }

    /// Runs `apply` against the chat record and persists the snapshot.
    pub fn update<R>(&self, chat_id: &str, apply: impl FnOnce(&mut ChatState) -> R) -> Result<R> {
        let mut store = self.lock()?;
        let output = apply(store.ensure(chat_id));
        store.save()?;
        Ok(output)
    }

    pub fn save(&self) -> Result<()> {
        self.lock()?.save()
    }
}
