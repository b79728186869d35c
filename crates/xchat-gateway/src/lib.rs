//! Agent Gateway seam for the xchat relay.
//!
//! The relay talks to every backend through [`GatewayRpc`], a plain
//! method/params request channel. [`WsGatewayClient`] implements it over a
//! websocket; [`RpcAgentGateway`] layers the relay-facing calls (agent turns,
//! session activation patches, direct notices) on top of three such channels.

pub mod agent_gateway;
pub mod gateway_error;
pub mod gateway_rpc;
pub mod ws_gateway_client;

pub use agent_gateway::{
    clamp_prompt, AgentGateway, AgentTurnReply, AgentTurnRequest, BackendEndpoint,
    GroupActivation, RelayBackend, RpcAgentGateway, DEFAULT_MAX_CHARS_PER_PROMPT,
};
pub use gateway_error::GatewayError;
pub use gateway_rpc::{wait_ready, GatewayRpc, ReadinessProbe};
pub use ws_gateway_client::{
    build_request_frame, parse_gateway_frame, GatewayResponseFrame, WsGatewayClient,
};
