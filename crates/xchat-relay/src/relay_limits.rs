/// Relay tunables shared by the state defaults, the trigger guard and the
/// agent envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    pub cooldown_ms: u64,
    pub max_triggers_per_minute: usize,
    pub max_chars_per_prompt: usize,
    pub default_rounds: u8,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            cooldown_ms: 8_000,
            max_triggers_per_minute: 6,
            max_chars_per_prompt: xchat_gateway::DEFAULT_MAX_CHARS_PER_PROMPT,
            default_rounds: 1,
        }
    }
}
