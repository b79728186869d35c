//! Per-chat transcript handler: routes control commands, guards ordinary
//! utterances and spawns scheduler runs.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::try_join;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xchat_core::current_unix_timestamp_ms;
use xchat_gateway::{AgentGateway, GatewayError, GroupActivation, RelayBackend};
use xchat_transcript::{extract_user_utterance, TranscriptLineHandler};

use crate::relay_command_matcher::{RelayCommand, RelayCommandMatcher};
use crate::relay_limits::RelayLimits;
use crate::relay_prompts::{
    disable_failed_notice, enable_failed_notice, enabled_notice, kickoff_failed_notice,
    kickoff_notice, kickoff_user_text, rounds_set_notice, run_failed_notice, status_notice,
    MentionHandles, DISABLED_NOTICE, KICKOFF_BUSY_NOTICE,
};
use crate::relay_state_store::{RelayMode, SharedChatStateStore};
use crate::relay_trigger_guard::{InFlightPermit, RelayTriggerGuard, SkipReason, TriggerDecision};
use crate::relay_turn_scheduler::{effective_rounds, RelayTurnScheduler, TurnRunRequest};
use crate::session_index::ChatSession;

#[derive(Clone)]
/// Collaborators shared by every chat handler of one relay process.
pub struct RelayContext {
    pub gateway: Arc<dyn AgentGateway>,
    pub store: SharedChatStateStore,
    pub scheduler: Arc<RelayTurnScheduler>,
    pub matcher: RelayCommandMatcher,
    pub limits: RelayLimits,
}

impl RelayContext {
    pub fn new(
        gateway: Arc<dyn AgentGateway>,
        store: SharedChatStateStore,
        handles: MentionHandles,
        limits: RelayLimits,
    ) -> Result<Self> {
        let scheduler = Arc::new(RelayTurnScheduler::new(
            Arc::clone(&gateway),
            store.clone(),
            handles,
        ));
        Ok(Self {
            gateway,
            store,
            scheduler,
            matcher: RelayCommandMatcher::new()?,
            limits,
        })
    }
}

async fn deliver_notice(gateway: &dyn AgentGateway, chat_id: &str, to: &str, message: &str) {
    if let Err(error) = gateway.send_notice(to, message).await {
        warn!(
            chat_id,
            error = %error,
            reason_code = error.reason_code(),
            "failed to deliver relay notice"
        );
    }
}

/// Owns the relay bookkeeping of one chat. Lines are handled in file order;
/// scheduler runs are spawned so later lines are still observed (and dropped
/// by the single-flight rule) while a run is active.
pub struct RelayChatHandler {
    session: ChatSession,
    reply_to: String,
    context: RelayContext,
    guard: RelayTriggerGuard,
    active_run: Option<JoinHandle<()>>,
}

impl RelayChatHandler {
    pub fn new(session: ChatSession, context: RelayContext) -> Self {
        let reply_to = session.reply_to();
        let guard = RelayTriggerGuard::new(&context.limits);
        Self {
            session,
            reply_to,
            context,
            guard,
            active_run: None,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.session.chat_id
    }

    pub fn is_in_flight(&self) -> bool {
        self.guard.is_in_flight()
    }

    /// Waits for the most recently spawned scheduler run to finish.
    pub async fn wait_for_idle(&mut self) {
        if let Some(run) = self.active_run.take() {
            if let Err(error) = run.await {
                warn!(chat_id = %self.session.chat_id, error = %error, "relay run task aborted");
            }
        }
    }

    /// Handles one extracted user utterance.
    pub async fn handle_utterance(&mut self, text: &str) -> Result<()> {
        if let Some(command) = self.context.matcher.match_command(text) {
            info!(chat_id = %self.session.chat_id, command = ?command, "relay command received");
            return self.handle_command(command).await;
        }
        self.handle_trigger(text)
    }

    fn handle_trigger(&mut self, text: &str) -> Result<()> {
        let now_ms = current_unix_timestamp_ms();
        let guard = &mut self.guard;
        let evaluated = self.context.store.with_chat(&self.session.chat_id, |state| {
            if !state.enabled {
                return None;
            }
            let decision = guard.evaluate(text, state, now_ms);
            Some((decision, state.mode, state.rounds))
        })?;
        let Some((decision, mode, rounds)) = evaluated else {
            debug!(chat_id = %self.session.chat_id, "relay disabled; utterance ignored");
            return Ok(());
        };

        match decision {
            TriggerDecision::Skip(reason) => {
                self.log_skip(reason);
                Ok(())
            }
            TriggerDecision::Accept(permit) => {
                self.context.store.save()?;
                let request = self.run_request(text, mode, effective_rounds(rounds, None, false));
                self.spawn_run(request, false, permit);
                Ok(())
            }
        }
    }

    fn log_skip(&self, reason: SkipReason) {
        match reason {
            SkipReason::Cooldown { remaining_ms } => info!(
                chat_id = %self.session.chat_id,
                remaining_ms,
                reason_code = reason.reason_code(),
                "relay trigger skipped"
            ),
            SkipReason::RateLimit { count } => info!(
                chat_id = %self.session.chat_id,
                count,
                reason_code = reason.reason_code(),
                "relay trigger skipped"
            ),
            SkipReason::ControlCommand | SkipReason::InFlight => info!(
                chat_id = %self.session.chat_id,
                reason_code = reason.reason_code(),
                "relay trigger skipped"
            ),
        }
    }

    async fn handle_command(&mut self, command: RelayCommand) -> Result<()> {
        match command {
            RelayCommand::On(mode) => self.enable(mode).await,
            RelayCommand::Kickoff(mode) => self.kickoff(mode).await,
            RelayCommand::Off => self.disable().await,
            RelayCommand::Status => {
                let state = self.context.store.snapshot(&self.session.chat_id)?;
                self.notify(&status_notice(&state, self.guard.is_in_flight()))
                    .await;
                Ok(())
            }
            RelayCommand::SetRounds(rounds) => {
                self.context
                    .store
                    .update(&self.session.chat_id, |state| state.rounds = rounds)?;
                self.notify(&rounds_set_notice(rounds)).await;
                Ok(())
            }
        }
    }

    async fn enable(&mut self, mode: RelayMode) -> Result<()> {
        if let Err(error) = self.patch_secondary(GroupActivation::Mention).await {
            self.log_patch_failure("enable", &error);
            self.notify(&enable_failed_notice(&error.to_string())).await;
            return Ok(());
        }
        let rounds = self
            .context
            .store
            .update(&self.session.chat_id, |state| {
                state.enabled = true;
                state.mode = mode;
                state.rounds = effective_rounds(state.rounds, None, true);
                state.rounds
            })?;
        info!(chat_id = %self.session.chat_id, mode = %mode, rounds, "relay mode enabled");
        self.notify(&enabled_notice(mode, rounds)).await;
        self.start_kickoff(mode, rounds);
        Ok(())
    }

    async fn kickoff(&mut self, requested: Option<RelayMode>) -> Result<()> {
        if let Err(error) = self.patch_secondary(GroupActivation::Mention).await {
            self.log_patch_failure("kickoff", &error);
            self.notify(&kickoff_failed_notice(&error.to_string())).await;
            return Ok(());
        }
        let (mode, rounds) = self
            .context
            .store
            .update(&self.session.chat_id, |state| {
                state.enabled = true;
                state.mode = requested.unwrap_or(state.mode);
                state.rounds = effective_rounds(state.rounds, None, true);
                (state.mode, state.rounds)
            })?;
        let Some(permit) = self.guard.try_acquire() else {
            self.log_skip(SkipReason::InFlight);
            self.notify(KICKOFF_BUSY_NOTICE).await;
            return Ok(());
        };
        self.notify(&kickoff_notice(mode, rounds)).await;
        self.spawn_kickoff(mode, rounds, permit);
        Ok(())
    }

    async fn disable(&mut self) -> Result<()> {
        if let Err(error) = self.patch_secondary(GroupActivation::Default).await {
            self.log_patch_failure("disable", &error);
            self.notify(&disable_failed_notice(&error.to_string())).await;
            return Ok(());
        }
        self.context
            .store
            .update(&self.session.chat_id, |state| state.enabled = false)?;
        info!(chat_id = %self.session.chat_id, "relay mode disabled");
        self.notify(DISABLED_NOTICE).await;
        Ok(())
    }

    fn start_kickoff(&mut self, mode: RelayMode, rounds: u8) {
        let Some(permit) = self.guard.try_acquire() else {
            self.log_skip(SkipReason::InFlight);
            return;
        };
        self.spawn_kickoff(mode, rounds, permit);
    }

    fn spawn_kickoff(&mut self, mode: RelayMode, rounds: u8, permit: InFlightPermit) {
        let request = self.run_request(
            kickoff_user_text(mode),
            mode,
            effective_rounds(rounds, None, true),
        );
        self.spawn_run(request, true, permit);
    }

    fn run_request(&self, user_text: &str, mode: RelayMode, rounds: u8) -> TurnRunRequest {
        TurnRunRequest {
            chat_id: self.session.chat_id.clone(),
            session_key: self.session.session_key.clone(),
            reply_to: self.reply_to.clone(),
            user_text: user_text.to_string(),
            mode,
            rounds,
        }
    }

    fn spawn_run(&mut self, request: TurnRunRequest, kickoff: bool, permit: InFlightPermit) {
        let scheduler = Arc::clone(&self.context.scheduler);
        let gateway = Arc::clone(&self.context.gateway);
        let store = self.context.store.clone();
        self.active_run = Some(tokio::spawn(async move {
            if let Err(error) = scheduler.run(&request).await {
                warn!(
                    chat_id = %request.chat_id,
                    kickoff,
                    error = %error,
                    reason_code = "relay_run_failed",
                    "relay run failed"
                );
                let notice = if kickoff {
                    kickoff_failed_notice(&error.to_string())
                } else {
                    run_failed_notice(&error.to_string())
                };
                deliver_notice(gateway.as_ref(), &request.chat_id, &request.reply_to, &notice)
                    .await;
            }
            drop(permit);
            if let Err(error) = store.save() {
                warn!(
                    chat_id = %request.chat_id,
                    error = %error,
                    reason_code = "relay_state_save_failed",
                    "failed to persist chat state after relay run"
                );
            }
        }));
    }

    async fn patch_secondary(&self, activation: GroupActivation) -> Result<(), GatewayError> {
        let gateway = self.context.gateway.as_ref();
        let key = self.session.session_key.as_str();
        try_join(
            gateway.patch_session(RelayBackend::A, key, activation),
            gateway.patch_session(RelayBackend::B, key, activation),
        )
        .await?;
        Ok(())
    }

    fn log_patch_failure(&self, action: &str, error: &GatewayError) {
        warn!(
            chat_id = %self.session.chat_id,
            action,
            error = %error,
            reason_code = error.reason_code(),
            "session activation patch failed"
        );
    }

    async fn notify(&self, message: &str) {
        deliver_notice(
            self.context.gateway.as_ref(),
            &self.session.chat_id,
            &self.reply_to,
            message,
        )
        .await;
    }
}

#[async_trait]
impl TranscriptLineHandler for RelayChatHandler {
    async fn handle_line(&mut self, line: &str) -> Result<()> {
        let Some(text) = extract_user_utterance(line)? else {
            return Ok(());
        };
        self.handle_utterance(&text).await
    }
}
