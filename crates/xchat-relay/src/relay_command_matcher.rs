use anyhow::{Context, Result};
use regex::Regex;

use crate::relay_state_store::RelayMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On(RelayMode),
    Off,
    Status,
    /// `None` keeps the chat's current mode.
    Kickoff(Option<RelayMode>),
    SetRounds(u8),
}

const COMMAND_PHRASES: &[(&[&str], RelayCommand)] = &[
    (
        &[
            "开启三方交流模式",
            "开启三人交流模式",
            "开启三方互聊",
            "三方互聊开",
            "/xchat trio",
            "/xchat 三方",
            "/xchat 3",
        ],
        RelayCommand::On(RelayMode::Trio),
    ),
    (
        &[
            "开启交流模式",
            "打开交流模式",
            "交流模式开",
            "/xchat on",
            "/xchat 开",
            "/xchat 开启",
        ],
        RelayCommand::On(RelayMode::Duo),
    ),
    (
        &[
            "关闭交流模式",
            "退出交流模式",
            "交流模式关",
            "/xchat off",
            "/xchat 关",
            "/xchat 关闭",
        ],
        RelayCommand::Off,
    ),
    (
        &["交流模式状态", "/xchat status", "/xchat 状态"],
        RelayCommand::Status,
    ),
    (
        &["开场三方互聊", "三方交流开场", "/xchat kickoff3", "/xchat 三方开场"],
        RelayCommand::Kickoff(Some(RelayMode::Trio)),
    ),
    (
        &["开场互聊", "交流开场", "/xchat kickoff", "/xchat 开场"],
        RelayCommand::Kickoff(None),
    ),
];

const ROUNDS_PATTERN: &str = r"^(?:交流轮数|/xchat rounds)\s+(\d+)$";

/// True for slash-prefixed text, which is never relayed as conversation.
pub fn is_control_command(text: &str) -> bool {
    text.trim().starts_with('/')
}

#[derive(Debug, Clone)]
/// Exact-match classifier for relay control phrases.
pub struct RelayCommandMatcher {
    rounds_pattern: Regex,
}

impl RelayCommandMatcher {
    pub fn new() -> Result<Self> {
        let rounds_pattern =
            Regex::new(ROUNDS_PATTERN).context("failed to compile rounds command pattern")?;
        Ok(Self { rounds_pattern })
    }

    pub fn match_command(&self, text: &str) -> Option<RelayCommand> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some((_, command)) = COMMAND_PHRASES
            .iter()
            .find(|(phrases, _)| phrases.contains(&text))
        {
            return Some(*command);
        }
        let captures = self.rounds_pattern.captures(text)?;
        let rounds = captures.get(1)?.as_str().parse::<u8>().ok()?;
        (1..=3)
            .contains(&rounds)
            .then_some(RelayCommand::SetRounds(rounds))
    }
}

#[cfg(test)]
mod tests {
    use super::{is_control_command, RelayCommand, RelayCommandMatcher, COMMAND_PHRASES};
    use crate::relay_state_store::RelayMode;

    fn matcher() -> RelayCommandMatcher {
        RelayCommandMatcher::new().expect("matcher")
    }

    #[test]
    fn unit_every_phrase_matches_with_surrounding_whitespace() {
        let matcher = matcher();
        for (phrases, expected) in COMMAND_PHRASES {
            for phrase in *phrases {
                assert_eq!(matcher.match_command(phrase), Some(*expected), "{phrase}");
                let padded = format!("  {phrase}\n");
                assert_eq!(
                    matcher.match_command(&padded),
                    matcher.match_command(phrase),
                    "{phrase}"
                );
            }
        }
    }

    #[test]
    fn unit_mode_variants_resolve_to_expected_commands() {
        let matcher = matcher();
        assert_eq!(
            matcher.match_command("开启交流模式"),
            Some(RelayCommand::On(RelayMode::Duo))
        );
        assert_eq!(
            matcher.match_command("/xchat 3"),
            Some(RelayCommand::On(RelayMode::Trio))
        );
        assert_eq!(
            matcher.match_command("开场三方互聊"),
            Some(RelayCommand::Kickoff(Some(RelayMode::Trio)))
        );
        assert_eq!(
            matcher.match_command("/xchat kickoff"),
            Some(RelayCommand::Kickoff(None))
        );
    }

    #[test]
    fn functional_set_rounds_accepts_only_one_to_three() {
        let matcher = matcher();
        assert_eq!(
            matcher.match_command("交流轮数 2"),
            Some(RelayCommand::SetRounds(2))
        );
        assert_eq!(
            matcher.match_command("交流轮数   3"),
            Some(RelayCommand::SetRounds(3))
        );
        assert_eq!(
            matcher.match_command("/xchat rounds 1"),
            Some(RelayCommand::SetRounds(1))
        );
        assert_eq!(matcher.match_command("交流轮数 0"), None);
        assert_eq!(matcher.match_command("交流轮数 4"), None);
        assert_eq!(matcher.match_command("交流轮数 999"), None);
        assert_eq!(matcher.match_command("交流轮数2"), None);
    }

    #[test]
    fn regression_near_misses_are_ordinary_input() {
        let matcher = matcher();
        for text in [
            "",
            "   ",
            "开启交流模式吧",
            "请开启交流模式",
            "/XCHAT ON",
            "/xchat",
            "/xchat  on",
            "交流模式",
        ] {
            assert_eq!(matcher.match_command(text), None, "{text:?}");
        }
    }

    #[test]
    fn unit_is_control_command_detects_slash_prefix() {
        assert!(is_control_command("/model gpt"));
        assert!(is_control_command("  /status"));
        assert!(!is_control_command("hello /there"));
        assert!(!is_control_command(""));
    }
}
