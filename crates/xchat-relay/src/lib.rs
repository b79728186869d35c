//! Relay orchestration: command matching, durable per-chat state, trigger
//! guarding and the round-robin turn scheduler that drives the backends.

pub mod relay_chat_runtime;
pub mod relay_command_matcher;
pub mod relay_limits;
pub mod relay_prompts;
pub mod relay_state_store;
pub mod relay_trigger_guard;
pub mod relay_turn_scheduler;
pub mod session_index;

pub use relay_chat_runtime::{RelayChatHandler, RelayContext};
pub use relay_command_matcher::{is_control_command, RelayCommand, RelayCommandMatcher};
pub use relay_limits::RelayLimits;
pub use relay_prompts::MentionHandles;
pub use relay_state_store::{
    clamp_rounds, BridgeContext, ChatState, ChatStateStore, RelayMode, SharedChatStateStore,
};
pub use relay_trigger_guard::{InFlightPermit, RelayTriggerGuard, SkipReason, TriggerDecision};
pub use relay_turn_scheduler::{effective_rounds, RelayTurnScheduler, TurnRunOutcome, TurnRunRequest};
pub use session_index::{discover_group_sessions, parse_group_sessions, reply_target_for, ChatSession};

#[cfg(test)]
mod test_support;
