//! Drives the fixed backend sequence for one relay trigger.
//!
//! Every backend call is awaited before the next is issued, and the bridge
//! context is persisted after each call so a crash mid-round loses at most
//! the in-flight call.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use xchat_gateway::{AgentGateway, AgentTurnRequest, RelayBackend};

use crate::relay_prompts::{
    duo_prompt_a, duo_prompt_b, trio_prompt_a, trio_prompt_b, trio_prompt_c, MentionHandles,
};
use crate::relay_state_store::{clamp_rounds, BridgeContext, RelayMode, SharedChatStateStore};

const KICKOFF_MIN_ROUNDS: u8 = 2;

/// Round count for a run: the override (or configured value) clamped to
/// `1..=3`, raised to at least two for kickoff runs.
pub fn effective_rounds(configured: u8, round_override: Option<u8>, kickoff: bool) -> u8 {
    let rounds = clamp_rounds(i64::from(round_override.unwrap_or(configured)));
    if kickoff {
        rounds.max(KICKOFF_MIN_ROUNDS)
    } else {
        rounds
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRunRequest {
    pub chat_id: String,
    pub session_key: String,
    pub reply_to: String,
    pub user_text: String,
    pub mode: RelayMode,
    pub rounds: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRunOutcome {
    pub rounds_completed: u8,
    pub backend_calls: usize,
}

pub struct RelayTurnScheduler {
    gateway: Arc<dyn AgentGateway>,
    store: SharedChatStateStore,
    handles: MentionHandles,
}

impl RelayTurnScheduler {
    pub fn new(
        gateway: Arc<dyn AgentGateway>,
        store: SharedChatStateStore,
        handles: MentionHandles,
    ) -> Self {
        Self {
            gateway,
            store,
            handles,
        }
    }

    pub async fn run(&self, request: &TurnRunRequest) -> Result<TurnRunOutcome> {
        let rounds = clamp_rounds(i64::from(request.rounds));
        info!(
            chat_id = %request.chat_id,
            mode = %request.mode,
            rounds,
            "relay run started"
        );
        let outcome = match request.mode {
            RelayMode::Duo => self.run_duo(request, rounds).await?,
            RelayMode::Trio => self.run_trio(request, rounds).await?,
        };
        info!(
            chat_id = %request.chat_id,
            rounds_completed = outcome.rounds_completed,
            backend_calls = outcome.backend_calls,
            "relay run completed"
        );
        Ok(outcome)
    }

    async fn run_duo(&self, request: &TurnRunRequest, rounds: u8) -> Result<TurnRunOutcome> {
        let mut seed = self
            .store
            .with_chat(&request.chat_id, |state| state.bridge.last_b.clone())?;
        let mut outcome = TurnRunOutcome {
            rounds_completed: 0,
            backend_calls: 0,
        };

        for round in 1..=rounds {
            let prompt = duo_prompt_a(&self.handles, &request.user_text, &seed);
            let a_reply = self.call(RelayBackend::A, request, prompt, round).await?;
            self.record(&request.chat_id, |bridge| bridge.last_a = a_reply.clone())?;
            outcome.backend_calls += 1;

            let prompt = duo_prompt_b(&self.handles, &request.user_text, &a_reply);
            let b_reply = self.call(RelayBackend::B, request, prompt, round).await?;
            self.record(&request.chat_id, |bridge| bridge.last_b = b_reply.clone())?;
            outcome.backend_calls += 1;

            seed = b_reply;
            outcome.rounds_completed = round;
        }
        Ok(outcome)
    }

    async fn run_trio(&self, request: &TurnRunRequest, rounds: u8) -> Result<TurnRunOutcome> {
        let mut seed = self.store.with_chat(&request.chat_id, |state| {
            if state.bridge.last_c.is_empty() {
                state.bridge.last_b.clone()
            } else {
                state.bridge.last_c.clone()
            }
        })?;
        let mut outcome = TurnRunOutcome {
            rounds_completed: 0,
            backend_calls: 0,
        };

        for round in 1..=rounds {
            let prompt = trio_prompt_a(&self.handles, &request.user_text, &seed);
            let a_reply = self.call(RelayBackend::A, request, prompt, round).await?;
            self.record(&request.chat_id, |bridge| bridge.last_a = a_reply.clone())?;
            outcome.backend_calls += 1;

            let prompt = trio_prompt_b(&self.handles, &request.user_text, &a_reply);
            let b_reply = self.call(RelayBackend::B, request, prompt, round).await?;
            self.record(&request.chat_id, |bridge| bridge.last_b = b_reply.clone())?;
            outcome.backend_calls += 1;

            let prompt = trio_prompt_c(&self.handles, &request.user_text, &a_reply, &b_reply);
            let c_reply = self.call(RelayBackend::C, request, prompt, round).await?;
            self.record(&request.chat_id, |bridge| bridge.last_c = c_reply.clone())?;
            outcome.backend_calls += 1;

            seed = if c_reply.is_empty() { b_reply } else { c_reply };
            outcome.rounds_completed = round;
        }
        Ok(outcome)
    }

    async fn call(
        &self,
        backend: RelayBackend,
        request: &TurnRunRequest,
        message: String,
        round: u8,
    ) -> Result<String> {
        let turn = AgentTurnRequest {
            session_key: request.session_key.clone(),
            reply_to: request.reply_to.clone(),
            message,
        };
        let reply = self.gateway.run_agent(backend, &turn).await?;
        info!(
            chat_id = %request.chat_id,
            backend = %backend,
            round,
            reply_chars = reply.text.chars().count(),
            "relay turn completed"
        );
        Ok(reply.text)
    }

    fn record(&self, chat_id: &str, apply: impl FnOnce(&mut BridgeContext)) -> Result<()> {
        self.store.update(chat_id, |state| apply(&mut state.bridge))
    }
}
