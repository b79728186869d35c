//! Relay-facing gateway calls layered on top of [`GatewayRpc`] channels.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use xchat_core::current_unix_timestamp_ms;

use crate::{GatewayError, GatewayRpc};

pub const DEFAULT_MAX_CHARS_PER_PROMPT: usize = 6_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Seat of a backend in the relay order. `A` and `B` are the secondary bots
/// whose group activation the relay takes over; `C` is the primary bot that
/// joins trio rounds and delivers relay notices.
pub enum RelayBackend {
    A,
    B,
    C,
}

impl RelayBackend {
    pub const ALL: [RelayBackend; 3] = [RelayBackend::A, RelayBackend::B, RelayBackend::C];
    pub const SECONDARY: [RelayBackend; 2] = [RelayBackend::A, RelayBackend::B];

    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
        }
    }
}

impl fmt::Display for RelayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Session-level group activation policy.
pub enum GroupActivation {
    /// Respond only when explicitly mentioned.
    Mention,
    /// Clear the override and fall back to the backend default.
    Default,
}

impl GroupActivation {
    fn as_param(self) -> Value {
        match self {
            Self::Mention => Value::String("mention".to_string()),
            Self::Default => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTurnRequest {
    pub session_key: String,
    pub reply_to: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurnReply {
    pub text: String,
    pub meta: Value,
}

#[async_trait]
/// Operations the turn scheduler and command handling need from the backends.
pub trait AgentGateway: Send + Sync {
    async fn run_agent(
        &self,
        backend: RelayBackend,
        request: &AgentTurnRequest,
    ) -> Result<AgentTurnReply, GatewayError>;

    async fn patch_session(
        &self,
        backend: RelayBackend,
        session_key: &str,
        activation: GroupActivation,
    ) -> Result<(), GatewayError>;

    async fn send_notice(&self, to: &str, message: &str) -> Result<(), GatewayError>;
}

/// Truncates `text` to `max_chars` characters, appending a note with the
/// original length when anything was cut.
pub fn clamp_prompt(text: &str, max_chars: usize) -> String {
    let total_chars = text.chars().count();
    if total_chars <= max_chars {
        return text.to_string();
    }
    let mut clamped = text.chars().take(max_chars).collect::<String>();
    clamped.push_str(&format!("\n\n(已截断，原长 {total_chars} chars)"));
    clamped
}

fn collect_payload_text(result: &Value) -> String {
    result
        .get("payloads")
        .and_then(Value::as_array)
        .map(|payloads| {
            payloads
                .iter()
                .filter_map(|payload| payload.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct BackendEndpoint {
    pub label: String,
    pub rpc: Arc<dyn GatewayRpc>,
}

impl BackendEndpoint {
    pub fn new(label: impl Into<String>, rpc: Arc<dyn GatewayRpc>) -> Self {
        Self {
            label: label.into(),
            rpc,
        }
    }
}

/// [`AgentGateway`] backed by one RPC channel per relay seat.
pub struct RpcAgentGateway {
    endpoints: [BackendEndpoint; 3],
    reply_channel: String,
    max_chars_per_prompt: usize,
    idempotency_seq: AtomicU64,
}

impl RpcAgentGateway {
    pub fn new(
        a: BackendEndpoint,
        b: BackendEndpoint,
        c: BackendEndpoint,
        reply_channel: impl Into<String>,
    ) -> Self {
        Self {
            endpoints: [a, b, c],
            reply_channel: reply_channel.into(),
            max_chars_per_prompt: DEFAULT_MAX_CHARS_PER_PROMPT,
            idempotency_seq: AtomicU64::new(0),
        }
    }

    pub fn with_max_chars_per_prompt(mut self, max_chars: usize) -> Self {
        self.max_chars_per_prompt = max_chars.max(1);
        self
    }

    pub fn endpoint(&self, backend: RelayBackend) -> &BackendEndpoint {
        &self.endpoints[backend.index()]
    }

    fn idempotency_key(&self) -> String {
        format!(
            "xchat-{}-{}",
            current_unix_timestamp_ms(),
            self.idempotency_seq.fetch_add(1, Ordering::Relaxed)
        )
    }
}

#[async_trait]
impl AgentGateway for RpcAgentGateway {
    async fn run_agent(
        &self,
        backend: RelayBackend,
        request: &AgentTurnRequest,
    ) -> Result<AgentTurnReply, GatewayError> {
        let endpoint = self.endpoint(backend);
        let params = json!({
            "message": clamp_prompt(&request.message, self.max_chars_per_prompt),
            "sessionKey": request.session_key,
            "deliver": true,
            "replyChannel": self.reply_channel,
            "replyTo": request.reply_to,
            "idempotencyKey": self.idempotency_key(),
        });
        let payload = endpoint.rpc.request("agent", params, true).await?;
        if payload.get("status").and_then(Value::as_str) != Some("ok") {
            return Err(GatewayError::AgentFailed {
                backend: endpoint.label.clone(),
                payload: payload.to_string(),
            });
        }
        let result = payload.get("result").cloned().unwrap_or(Value::Null);
        Ok(AgentTurnReply {
            text: collect_payload_text(&result),
            meta: result.get("meta").cloned().unwrap_or(Value::Null),
        })
    }

    async fn patch_session(
        &self,
        backend: RelayBackend,
        session_key: &str,
        activation: GroupActivation,
    ) -> Result<(), GatewayError> {
        let endpoint = self.endpoint(backend);
        let payload = endpoint
            .rpc
            .request(
                "sessions.patch",
                json!({
                    "key": session_key,
                    "groupActivation": activation.as_param(),
                }),
                true,
            )
            .await?;
        let patched_key = payload
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or(session_key);
        info!(
            backend = %endpoint.label,
            key = patched_key,
            "sessions.patch ok"
        );
        Ok(())
    }

    async fn send_notice(&self, to: &str, message: &str) -> Result<(), GatewayError> {
        let endpoint = self.endpoint(RelayBackend::C);
        endpoint
            .rpc
            .request(
                "send",
                json!({
                    "to": to,
                    "message": message,
                    "channel": self.reply_channel,
                    "idempotencyKey": self.idempotency_key(),
                }),
                true,
            )
            .await?;
        Ok(())
    }
}
