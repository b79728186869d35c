use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::GatewayError;

#[async_trait]
/// One request/response channel to a backend gateway.
///
/// With `expect_final`, implementations must skip interim acknowledgements and
/// resolve only with the final result of the call.
pub trait GatewayRpc: Send + Sync {
    async fn request(
        &self,
        method: &str,
        params: Value,
        expect_final: bool,
    ) -> Result<Value, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Polls `status` until the gateway answers or the probe deadline passes.
///
/// Each attempt is bounded by the time left before the deadline, so a gateway
/// that accepts the connection but never replies still fails the probe.
pub async fn wait_ready(
    rpc: &dyn GatewayRpc,
    label: &str,
    probe: ReadinessProbe,
) -> Result<(), GatewayError> {
    let deadline = Instant::now() + probe.deadline;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, rpc.request("status", json!({}), true)).await {
            Ok(Ok(_)) => {
                info!(gateway = label, "gateway ready");
                return Ok(());
            }
            Ok(Err(error)) => {
                debug!(gateway = label, error = %error, "gateway status probe failed");
            }
            Err(_) => {
                debug!(
                    gateway = label,
                    timeout_ms = remaining.as_millis() as u64,
                    "gateway status probe timed out"
                );
            }
        }
        if Instant::now() + probe.interval > deadline {
            return Err(GatewayError::NotReady {
                label: label.to_string(),
                waited_ms: probe.deadline.as_millis() as u64,
            });
        }
        tokio::time::sleep(probe.interval).await;
    }
}
