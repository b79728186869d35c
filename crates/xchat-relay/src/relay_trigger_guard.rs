//! Per-chat cooldown, sliding-window cap and single-flight bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xchat_core::elapsed_since_ms;

use crate::relay_command_matcher::is_control_command;
use crate::relay_limits::RelayLimits;
use crate::relay_state_store::ChatState;

const TRIGGER_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ControlCommand,
    InFlight,
    Cooldown { remaining_ms: u64 },
    RateLimit { count: usize },
}

impl SkipReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ControlCommand => "relay_skip_control_command",
            Self::InFlight => "relay_skip_in_flight",
            Self::Cooldown { .. } => "relay_skip_cooldown",
            Self::RateLimit { .. } => "relay_skip_rate_limit",
        }
    }
}

#[derive(Debug)]
pub enum TriggerDecision {
    Accept(InFlightPermit),
    Skip(SkipReason),
}

#[derive(Debug)]
/// Marks the chat as running until dropped.
pub struct InFlightPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct RelayTriggerGuard {
    max_triggers_per_minute: usize,
    in_flight: Arc<AtomicBool>,
    recent: VecDeque<u64>,
}

impl RelayTriggerGuard {
    pub fn new(limits: &RelayLimits) -> Self {
        Self {
            max_triggers_per_minute: limits.max_triggers_per_minute.max(1),
            in_flight: Arc::new(AtomicBool::new(false)),
            recent: VecDeque::new(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn recent_trigger_count(&self) -> usize {
        self.recent.len()
    }

    /// Claims the single-flight slot without the cooldown or rate checks.
    pub fn try_acquire(&self) -> Option<InFlightPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit {
                flag: Arc::clone(&self.in_flight),
            })
    }

    /// Applies the trigger rules in order to an ordinary utterance of an
    /// enabled chat. Acceptance stamps `last_trigger_at`; the caller persists.
    pub fn evaluate(&mut self, text: &str, state: &mut ChatState, now_ms: u64) -> TriggerDecision {
        if is_control_command(text) {
            return TriggerDecision::Skip(SkipReason::ControlCommand);
        }
        if self.is_in_flight() {
            return TriggerDecision::Skip(SkipReason::InFlight);
        }

        let elapsed_ms = elapsed_since_ms(now_ms, state.last_trigger_at);
        if state.last_trigger_at > 0 && elapsed_ms < state.cooldown_ms {
            return TriggerDecision::Skip(SkipReason::Cooldown {
                remaining_ms: state.cooldown_ms - elapsed_ms,
            });
        }

        let window_start = now_ms.saturating_sub(TRIGGER_WINDOW_MS);
        while self
            .recent
            .front()
            .is_some_and(|timestamp| *timestamp < window_start)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(now_ms);
        if self.recent.len() > self.max_triggers_per_minute {
            return TriggerDecision::Skip(SkipReason::RateLimit {
                count: self.recent.len(),
            });
        }

        match self.try_acquire() {
            Some(permit) => {
                state.last_trigger_at = now_ms;
                TriggerDecision::Accept(permit)
            }
            None => TriggerDecision::Skip(SkipReason::InFlight),
        }
    }
}
