use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GatewayEndpointConfig {
    pub(crate) url: String,
    pub(crate) token: Option<String>,
}

/// Reads a gateway config file. The file is required; a missing port falls
/// back to `fallback_port`.
pub(crate) fn load_gateway_endpoint(path: &Path, fallback_port: u16) -> Result<GatewayEndpointConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gateway config {}", path.display()))?;
    let config = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse gateway config {}", path.display()))?;
    parse_gateway_endpoint(&config, fallback_port, path)
}

pub(crate) fn parse_gateway_endpoint(
    config: &Value,
    fallback_port: u16,
    source: &Path,
) -> Result<GatewayEndpointConfig> {
    let gateway = config.get("gateway");
    let port = gateway
        .and_then(|gateway| gateway.get("port"))
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(fallback_port);

    let auth = gateway.and_then(|gateway| gateway.get("auth"));
    let mode = auth
        .and_then(|auth| auth.get("mode"))
        .and_then(Value::as_str);
    let token = auth
        .and_then(|auth| auth.get("token"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    if mode == Some("token") && token.is_none() {
        bail!("gateway auth token missing in {}", source.display());
    }

    Ok(GatewayEndpointConfig {
        url: format!("ws://127.0.0.1:{port}"),
        token,
    })
}
