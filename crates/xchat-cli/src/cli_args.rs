use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::Parser;

fn parse_round_count(value: &str) -> Result<u8, String> {
    let parsed = value
        .parse::<u8>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if !(1..=3).contains(&parsed) {
        return Err("value must be in range 1..=3".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "xchat",
    about = "Relays group chat messages between agent gateways in scripted rounds",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "openclaw-dir",
        env = "OPENCLAW_DIR",
        help = "Primary gateway home directory (default: ~/.openclaw)"
    )]
    pub(crate) openclaw_dir: Option<PathBuf>,

    #[arg(
        long = "deepseek-dir",
        env = "DEEPSEEK_DIR",
        help = "Backend A gateway home directory (default: ~/.clawd-deepseek)"
    )]
    pub(crate) deepseek_dir: Option<PathBuf>,

    #[arg(
        long = "glm-dir",
        env = "GLM_DIR",
        help = "Backend B gateway home directory (default: ~/.clawd-glm)"
    )]
    pub(crate) glm_dir: Option<PathBuf>,

    #[arg(
        long = "agent-id",
        env = "OPENCLAW_AGENT_ID",
        default_value = "main",
        help = "Agent id whose session index lists the monitored group chats"
    )]
    pub(crate) agent_id: String,

    #[arg(
        long = "state-path",
        env = "XCHAT_STATE_PATH",
        help = "Relay state snapshot path (default: <openclaw-dir>/xchat/state.json)"
    )]
    pub(crate) state_path: Option<PathBuf>,

    #[arg(
        long = "session-store-path",
        env = "OPENCLAW_SESSION_STORE_PATH",
        help = "Session index path (default: <openclaw-dir>/agents/<agent-id>/sessions/sessions.json)"
    )]
    pub(crate) session_store_path: Option<PathBuf>,

    #[arg(
        long = "openclaw-config",
        env = "OPENCLAW_CONFIG_PATH",
        help = "Primary gateway config (default: <openclaw-dir>/openclaw.json)"
    )]
    pub(crate) openclaw_config: Option<PathBuf>,

    #[arg(
        long = "deepseek-config",
        env = "DEEPSEEK_CONFIG_PATH",
        help = "Backend A gateway config (default: <deepseek-dir>/clawdbot.json)"
    )]
    pub(crate) deepseek_config: Option<PathBuf>,

    #[arg(
        long = "glm-config",
        env = "GLM_CONFIG_PATH",
        help = "Backend B gateway config (default: <glm-dir>/clawdbot.json)"
    )]
    pub(crate) glm_config: Option<PathBuf>,

    #[arg(
        long = "mention-a",
        env = "XCHAT_MENTION_A",
        default_value = "@deepseek_bot",
        help = "Chat mention that addresses backend A"
    )]
    pub(crate) mention_a: String,

    #[arg(
        long = "mention-b",
        env = "XCHAT_MENTION_B",
        default_value = "@glm_bot",
        help = "Chat mention that addresses backend B"
    )]
    pub(crate) mention_b: String,

    #[arg(
        long = "mention-c",
        env = "XCHAT_MENTION_C",
        default_value = "@jarvis_bot",
        help = "Chat mention that addresses the primary backend"
    )]
    pub(crate) mention_c: String,

    #[arg(
        long = "reply-channel",
        env = "XCHAT_REPLY_CHANNEL",
        default_value = "telegram",
        help = "Delivery channel passed with agent turns and notices"
    )]
    pub(crate) reply_channel: String,

    #[arg(
        long = "cooldown-ms",
        env = "XCHAT_COOLDOWN_MS",
        default_value_t = 8_000,
        help = "Cooldown applied to newly created chat records"
    )]
    pub(crate) cooldown_ms: u64,

    #[arg(
        long = "max-triggers-per-minute",
        env = "XCHAT_MAX_TRIGGERS_PER_MINUTE",
        default_value_t = 6,
        value_parser = parse_positive_usize,
        help = "Relay triggers accepted per chat within a sliding 60s window"
    )]
    pub(crate) max_triggers_per_minute: usize,

    #[arg(
        long = "max-chars-per-prompt",
        env = "XCHAT_MAX_CHARS_PER_PROMPT",
        default_value_t = 6_000,
        value_parser = parse_positive_usize,
        help = "Agent prompts longer than this are truncated with a notice"
    )]
    pub(crate) max_chars_per_prompt: usize,

    #[arg(
        long = "default-rounds",
        env = "XCHAT_DEFAULT_ROUNDS",
        default_value_t = 1,
        value_parser = parse_round_count,
        help = "Relay rounds for newly created chat records (1..=3)"
    )]
    pub(crate) default_rounds: u8,

    #[arg(
        long = "tail-poll-interval-ms",
        env = "XCHAT_TAIL_POLL_INTERVAL_MS",
        default_value_t = 1_000,
        help = "Transcript poll fallback interval; 0 relies on file-change events only"
    )]
    pub(crate) tail_poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayPaths {
    pub(crate) state_path: PathBuf,
    pub(crate) session_store_path: PathBuf,
    pub(crate) openclaw_config: PathBuf,
    pub(crate) deepseek_config: PathBuf,
    pub(crate) glm_config: PathBuf,
}

impl Cli {
    /// Fills unset paths from the gateway home directories.
    pub(crate) fn resolve_paths(&self, home: Option<&Path>) -> Result<RelayPaths> {
        let home_dir = |name: &str| -> Result<PathBuf> {
            home.map(|home| home.join(name))
                .ok_or_else(|| anyhow!("HOME is not set; cannot derive the default {name} directory"))
        };
        let openclaw_dir = match &self.openclaw_dir {
            Some(dir) => dir.clone(),
            None => home_dir(".openclaw")?,
        };
        let deepseek_config = match (&self.deepseek_config, &self.deepseek_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join("clawdbot.json"),
            (None, None) => home_dir(".clawd-deepseek")?.join("clawdbot.json"),
        };
        let glm_config = match (&self.glm_config, &self.glm_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join("clawdbot.json"),
            (None, None) => home_dir(".clawd-glm")?.join("clawdbot.json"),
        };
        Ok(RelayPaths {
            state_path: self
                .state_path
                .clone()
                .unwrap_or_else(|| openclaw_dir.join("xchat").join("state.json")),
            session_store_path: self.session_store_path.clone().unwrap_or_else(|| {
                openclaw_dir
                    .join("agents")
                    .join(&self.agent_id)
                    .join("sessions")
                    .join("sessions.json")
            }),
            openclaw_config: self
                .openclaw_config
                .clone()
                .unwrap_or_else(|| openclaw_dir.join("openclaw.json")),
            deepseek_config,
            glm_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;

    use super::Cli;

    #[test]
    fn unit_resolve_paths_derives_defaults_from_home() {
        let cli = Cli::try_parse_from(["xchat"]).expect("parse");
        let paths = cli.resolve_paths(Some(Path::new("/home/relay"))).expect("paths");
        assert_eq!(
            paths.state_path,
            PathBuf::from("/home/relay/.openclaw/xchat/state.json")
        );
        assert_eq!(
            paths.session_store_path,
            PathBuf::from("/home/relay/.openclaw/agents/main/sessions/sessions.json")
        );
        assert_eq!(
            paths.openclaw_config,
            PathBuf::from("/home/relay/.openclaw/openclaw.json")
        );
        assert_eq!(
            paths.deepseek_config,
            PathBuf::from("/home/relay/.clawd-deepseek/clawdbot.json")
        );
        assert_eq!(
            paths.glm_config,
            PathBuf::from("/home/relay/.clawd-glm/clawdbot.json")
        );
    }

    #[test]
    fn functional_explicit_flags_override_derived_paths() {
        let cli = Cli::try_parse_from([
            "xchat",
            "--openclaw-dir",
            "/srv/openclaw",
            "--agent-id",
            "ops",
            "--glm-dir",
            "/srv/glm",
            "--deepseek-config",
            "/etc/deepseek.json",
            "--state-path",
            "/var/lib/xchat.json",
        ])
        .expect("parse");
        let paths = cli.resolve_paths(None).expect("paths");
        assert_eq!(paths.state_path, PathBuf::from("/var/lib/xchat.json"));
        assert_eq!(
            paths.session_store_path,
            PathBuf::from("/srv/openclaw/agents/ops/sessions/sessions.json")
        );
        assert_eq!(paths.deepseek_config, PathBuf::from("/etc/deepseek.json"));
        assert_eq!(paths.glm_config, PathBuf::from("/srv/glm/clawdbot.json"));
    }

    #[test]
    fn regression_missing_home_without_explicit_dirs_is_an_error() {
        let cli = Cli::try_parse_from(["xchat", "--openclaw-dir", "/srv/openclaw"]).expect("parse");
        let error = cli.resolve_paths(None).expect_err("no home");
        assert!(error.to_string().contains("HOME is not set"));
    }

    #[test]
    fn regression_default_rounds_outside_range_is_rejected() {
        assert!(Cli::try_parse_from(["xchat", "--default-rounds", "4"]).is_err());
        assert!(Cli::try_parse_from(["xchat", "--max-triggers-per-minute", "0"]).is_err());
    }
}
