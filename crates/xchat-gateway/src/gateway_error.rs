use thiserror::Error;

#[derive(Debug, Error)]
/// Failures surfaced by gateway calls.
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway connection closed before a response arrived")]
    ConnectionClosed,
    #[error("gateway rejected {method}: {message}")]
    Rejected { method: String, message: String },
    #[error("{backend} agent failed: {payload}")]
    AgentFailed { backend: String, payload: String },
    #[error("{label} gateway not ready after {waited_ms}ms")]
    NotReady { label: String, waited_ms: u64 },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GatewayError {
    /// Short machine-readable code used in structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "gateway_transport",
            Self::ConnectionClosed => "gateway_connection_closed",
            Self::Rejected { .. } => "gateway_rejected",
            Self::AgentFailed { .. } => "gateway_agent_failed",
            Self::NotReady { .. } => "gateway_not_ready",
            Self::Serde(_) => "gateway_serde",
        }
    }
}
