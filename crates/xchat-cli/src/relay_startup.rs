use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use xchat_gateway::{
    wait_ready, BackendEndpoint, GatewayRpc, ReadinessProbe, RpcAgentGateway, WsGatewayClient,
};
use xchat_relay::{
    discover_group_sessions, ChatStateStore, MentionHandles, RelayChatHandler, RelayContext,
    RelayLimits, SharedChatStateStore,
};
use xchat_transcript::{TailOptions, TranscriptTail};

use crate::cli_args::Cli;
use crate::gateway_config::load_gateway_endpoint;

const OPENCLAW_FALLBACK_PORT: u16 = 18_789;
const DEEPSEEK_FALLBACK_PORT: u16 = 18_790;
const GLM_FALLBACK_PORT: u16 = 18_791;

fn relay_limits(cli: &Cli) -> RelayLimits {
    RelayLimits {
        cooldown_ms: cli.cooldown_ms,
        max_triggers_per_minute: cli.max_triggers_per_minute,
        max_chars_per_prompt: cli.max_chars_per_prompt,
        default_rounds: cli.default_rounds,
    }
}

fn tail_options(cli: &Cli) -> TailOptions {
    TailOptions {
        from_end: true,
        poll_interval: (cli.tail_poll_interval_ms > 0)
            .then(|| Duration::from_millis(cli.tail_poll_interval_ms)),
    }
}

pub(crate) async fn run_relay(cli: Cli) -> Result<()> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let paths = cli.resolve_paths(home.as_deref())?;
    let limits = relay_limits(&cli);

    let openclaw_endpoint = load_gateway_endpoint(&paths.openclaw_config, OPENCLAW_FALLBACK_PORT)?;
    let deepseek_endpoint = load_gateway_endpoint(&paths.deepseek_config, DEEPSEEK_FALLBACK_PORT)?;
    let glm_endpoint = load_gateway_endpoint(&paths.glm_config, GLM_FALLBACK_PORT)?;

    let openclaw = Arc::new(WsGatewayClient::new(
        "openclaw",
        openclaw_endpoint.url,
        openclaw_endpoint.token,
    ));
    let deepseek = Arc::new(WsGatewayClient::new(
        "deepseek",
        deepseek_endpoint.url,
        deepseek_endpoint.token,
    ));
    let glm = Arc::new(WsGatewayClient::new(
        "glm",
        glm_endpoint.url,
        glm_endpoint.token,
    ));

    let probe = ReadinessProbe::default();
    tokio::try_join!(
        wait_ready(openclaw.as_ref(), "openclaw", probe),
        wait_ready(deepseek.as_ref(), "deepseek", probe),
        wait_ready(glm.as_ref(), "glm", probe),
    )?;
    info!(
        openclaw = openclaw.url(),
        deepseek = deepseek.url(),
        glm = glm.url(),
        "connected gateways"
    );

    let sessions = discover_group_sessions(&paths.session_store_path)?;
    info!(
        chats = %sessions
            .iter()
            .map(|session| session.chat_id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        "found group sessions"
    );

    let store = SharedChatStateStore::new(ChatStateStore::load(paths.state_path.clone(), limits));
    let gateway = RpcAgentGateway::new(
        BackendEndpoint::new("deepseek", Arc::clone(&deepseek) as Arc<dyn GatewayRpc>),
        BackendEndpoint::new("glm", Arc::clone(&glm) as Arc<dyn GatewayRpc>),
        BackendEndpoint::new("openclaw", Arc::clone(&openclaw) as Arc<dyn GatewayRpc>),
        cli.reply_channel.clone(),
    )
    .with_max_chars_per_prompt(limits.max_chars_per_prompt);
    let handles = MentionHandles {
        a: cli.mention_a.clone(),
        b: cli.mention_b.clone(),
        c: cli.mention_c.clone(),
    };
    let context = RelayContext::new(Arc::new(gateway), store.clone(), handles, limits)?;

    let options = tail_options(&cli);
    let mut tails = Vec::with_capacity(sessions.len());
    for session in sessions {
        let state = store.register(&session.chat_id)?;
        let tail = TranscriptTail::start(
            &session.transcript_path,
            options,
            RelayChatHandler::new(session.clone(), context.clone()),
        )
        .with_context(|| {
            format!(
                "failed to start transcript tail for chat {}",
                session.chat_id
            )
        })?;
        info!(
            chat_id = %session.chat_id,
            transcript = %session.transcript_path.display(),
            enabled = state.enabled,
            mode = %state.mode,
            rounds = state.rounds,
            "chat relay ready"
        );
        tails.push(tail);
    }

    let signal = wait_for_shutdown_signal().await?;
    info!(signal, "shutting down relay");
    for tail in tails {
        tail.shutdown().await;
    }
    for client in [&openclaw, &deepseek, &glm] {
        client.disconnect().await;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok("SIGINT")
}
