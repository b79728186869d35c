//! Prompt templates, kickoff openers and user-facing relay notices.

use chrono::{DateTime, Utc};

use crate::relay_state_store::{ChatState, RelayMode};

const RELAY_GROUND_RULE: &str =
    "你会通过编排器看到对方的回复，所以可以直接引用/回应；不要讨论 Telegram/Bot API 的限制。";
const EMPTY_REPLY: &str = "(空)";

pub const DISABLED_NOTICE: &str = "交流模式: 已关闭";
pub const KICKOFF_BUSY_NOTICE: &str = "开场互聊已跳过: 上一轮交流仍在进行中";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Chat mentions used to address each backend's bot.
pub struct MentionHandles {
    pub a: String,
    pub b: String,
    pub c: String,
}

impl Default for MentionHandles {
    fn default() -> Self {
        Self {
            a: "@deepseek_bot".to_string(),
            b: "@glm_bot".to_string(),
            c: "@jarvis_bot".to_string(),
        }
    }
}

fn or_empty(reply: &str) -> &str {
    if reply.is_empty() {
        EMPTY_REPLY
    } else {
        reply
    }
}

fn address_line(handle: &str) -> String {
    format!("请直接对 {handle} 说话，第一行必须以“{handle}”开头。")
}

pub fn duo_prompt_a(handles: &MentionHandles, user_text: &str, seed: &str) -> String {
    let mut lines = vec![
        "你是 DeepSeek bot，在“交流模式”下与 GLM 协作。".to_string(),
        RELAY_GROUND_RULE.to_string(),
        address_line(&handles.b),
        format!("用户说: {user_text}"),
    ];
    if !seed.is_empty() {
        lines.push(format!(
            "上一轮 GLM 回复(供参考，可能与当前话题无关，必要时忽略): {seed}"
        ));
    }
    lines.extend(
        [
            "如果上一轮里出现“问DeepSeek:”且与当前话题相关，请先用1-2句回答。",
            "请输出:",
            "- 你的观点/方案（3-6条要点）",
            "- 对上一轮的补充/修正（如果有）",
            "- 你要问 GLM 的一个具体问题（最后一行以“问GLM:”开头）",
            "要求: 中文，<= 220 字。",
        ]
        .map(str::to_string),
    );
    lines.join("\n")
}

pub fn duo_prompt_b(handles: &MentionHandles, user_text: &str, a_reply: &str) -> String {
    [
        "你是 GLM bot，在“交流模式”下接力 DeepSeek。".to_string(),
        RELAY_GROUND_RULE.to_string(),
        address_line(&handles.a),
        format!("用户说: {user_text}"),
        format!("DeepSeek 回复: {}", or_empty(a_reply)),
        "如果 DeepSeek 里出现“问GLM:”请先用1-2句回答。".to_string(),
        "请输出:".to_string(),
        "- 你的收敛/执行建议（3-5条）".to_string(),
        "- 回答 DeepSeek 的问题（若有）".to_string(),
        "- 你要问 DeepSeek 的一个具体问题（倒数第二行以“问DeepSeek:”开头）".to_string(),
        "- 给用户的 1 个澄清问题（最后一行以“问用户:”开头）".to_string(),
        "要求: 中文，<= 260 字。".to_string(),
    ]
    .join("\n")
}

pub fn trio_prompt_a(handles: &MentionHandles, user_text: &str, seed: &str) -> String {
    let mut lines = vec![
        "你是 DeepSeek bot，在“三方交流模式”下与 GLM、Jarvis 协作。".to_string(),
        RELAY_GROUND_RULE.to_string(),
        address_line(&handles.b),
        format!("用户说: {user_text}"),
    ];
    if !seed.is_empty() {
        lines.push(format!("上一轮 Jarvis/GLM 回复(供参考，必要时忽略): {seed}"));
    }
    lines.extend(
        [
            "请输出:",
            "- 你的观点/方案（2-5条）",
            "- 你要问 GLM 的一个具体问题（最后一行以“问GLM:”开头）",
            "要求: 中文，<= 220 字。",
        ]
        .map(str::to_string),
    );
    lines.join("\n")
}

pub fn trio_prompt_b(handles: &MentionHandles, user_text: &str, a_reply: &str) -> String {
    [
        "你是 GLM bot，在“三方交流模式”下接力 DeepSeek。".to_string(),
        RELAY_GROUND_RULE.to_string(),
        address_line(&handles.c),
        format!("用户说: {user_text}"),
        format!("DeepSeek 回复: {}", or_empty(a_reply)),
        "如果 DeepSeek 里出现“问GLM:”请先用1-2句回答。".to_string(),
        "请输出:".to_string(),
        "- 你的收敛/执行建议（2-5条）".to_string(),
        "- 你要问 Jarvis 的一个具体问题（最后一行以“问Jarvis:”开头）".to_string(),
        "要求: 中文，<= 260 字。".to_string(),
    ]
    .join("\n")
}

pub fn trio_prompt_c(
    handles: &MentionHandles,
    user_text: &str,
    a_reply: &str,
    b_reply: &str,
) -> String {
    [
        "你是 Jarvis（OpenClaw 主机器人），在“三方交流模式”下接力 GLM。".to_string(),
        "你会通过编排器看到 DeepSeek/GLM 的回复，所以可以直接引用/回应；不要讨论 Telegram/Bot API 的限制。"
            .to_string(),
        address_line(&handles.a),
        format!("用户说: {user_text}"),
        format!("DeepSeek 回复: {}", or_empty(a_reply)),
        format!("GLM 回复: {}", or_empty(b_reply)),
        "请输出:".to_string(),
        "- 你对两者的整合/取舍（2-4条）".to_string(),
        "- 给用户的 1 个澄清问题（最后一行以“问用户:”开头）".to_string(),
        "要求: 中文，<= 260 字。".to_string(),
    ]
    .join("\n")
}

/// Synthesized opening utterance for kickoff runs.
pub fn kickoff_user_text(mode: RelayMode) -> &'static str {
    match mode {
        RelayMode::Duo => {
            "交流模式开场：你们两位先互相认识（各用一句话：模型/定位/擅长）。\n\
             然后选一个协作主题开始讨论，最后给用户一个可执行的下一步。"
        }
        RelayMode::Trio => {
            "三方交流开场：DeepSeek、GLM、Jarvis 依次自我介绍（各一句：模型/定位/擅长）。\n\
             然后选一个协作主题，按“DeepSeek -> GLM -> Jarvis”接力推进，最后给用户一个可执行的下一步。"
        }
    }
}

pub fn enabled_notice(mode: RelayMode, rounds: u8) -> String {
    let (title, trigger, kickoff_phrase) = match mode {
        RelayMode::Duo => ("交流模式", "DeepSeek <-> GLM 轮流发言", "开场互聊"),
        RelayMode::Trio => (
            "三方交流模式",
            "DeepSeek -> GLM -> Jarvis 接力发言",
            "开场三方互聊",
        ),
    };
    format!(
        "{title}: 已开启\n\
         - 触发: 每条消息驱动 {trigger}（通过编排器互相可见）\n\
         - 当前轮数: {rounds}（可发“交流轮数 1/2/3”调整）\n\
         - 开场: 发送“{kickoff_phrase}”\n\
         - 关闭: 发送“关闭交流模式”"
    )
}

pub fn kickoff_notice(mode: RelayMode, rounds: u8) -> String {
    let label = match mode {
        RelayMode::Duo => "开场互聊",
        RelayMode::Trio => "开场三方互聊",
    };
    format!("{label}开始（{rounds}轮）")
}

pub fn rounds_set_notice(rounds: u8) -> String {
    format!("交流轮数已设置为 {rounds}")
}

pub fn enable_failed_notice(error: &str) -> String {
    format!("交流模式开启失败: {error}")
}

pub fn disable_failed_notice(error: &str) -> String {
    format!("交流模式关闭失败: {error}")
}

pub fn kickoff_failed_notice(error: &str) -> String {
    format!("开场互聊失败: {error}")
}

pub fn run_failed_notice(error: &str) -> String {
    format!("交流模式出错: {error}")
}

fn render_trigger_time(last_trigger_at: u64) -> String {
    if last_trigger_at == 0 {
        return "从未".to_string();
    }
    i64::try_from(last_trigger_at)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|timestamp| timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{last_trigger_at}ms"))
}

pub fn status_notice(state: &ChatState, in_flight: bool) -> String {
    format!(
        "交流模式: {}\n- 模式: {}\n- 轮数: {}\n- 冷却: {}ms\n- 上次触发: {}\n- 进行中: {}",
        if state.enabled { "开启" } else { "关闭" },
        state.mode,
        state.rounds,
        state.cooldown_ms,
        render_trigger_time(state.last_trigger_at),
        if in_flight { "是" } else { "否" },
    )
}

#[cfg(test)]
mod tests {
    use super::{
        duo_prompt_a, duo_prompt_b, enabled_notice, kickoff_notice, status_notice, trio_prompt_b,
        trio_prompt_c, MentionHandles,
    };
    use crate::relay_limits::RelayLimits;
    use crate::relay_state_store::{ChatState, RelayMode};

    #[test]
    fn unit_duo_prompt_a_marks_seed_as_optional_context() {
        let handles = MentionHandles::default();
        let seeded = duo_prompt_a(&handles, "hello", "X");
        assert!(seeded.contains("用户说: hello"));
        assert!(seeded.contains("上一轮 GLM 回复(供参考，可能与当前话题无关，必要时忽略): X"));
        assert!(seeded.contains("第一行必须以“@glm_bot”开头"));

        let unseeded = duo_prompt_a(&handles, "hello", "");
        assert!(!unseeded.contains("上一轮 GLM 回复"));
    }

    #[test]
    fn unit_relay_prompts_substitute_empty_replies() {
        let handles = MentionHandles::default();
        assert!(duo_prompt_b(&handles, "q", "").contains("DeepSeek 回复: (空)"));
        assert!(trio_prompt_b(&handles, "q", "").contains("@jarvis_bot"));
        let closing = trio_prompt_c(&handles, "q", "a-out", "");
        assert!(closing.contains("DeepSeek 回复: a-out"));
        assert!(closing.contains("GLM 回复: (空)"));
        assert!(closing.contains("问用户:"));
    }

    #[test]
    fn unit_notices_render_mode_specific_text() {
        let duo = enabled_notice(RelayMode::Duo, 2);
        assert!(duo.starts_with("交流模式: 已开启"));
        assert!(duo.contains("当前轮数: 2"));
        assert!(enabled_notice(RelayMode::Trio, 3).starts_with("三方交流模式: 已开启"));
        assert_eq!(kickoff_notice(RelayMode::Trio, 2), "开场三方互聊开始（2轮）");
    }

    #[test]
    fn unit_status_notice_renders_trigger_time() {
        let mut state = ChatState::with_limits(&RelayLimits::default());
        assert!(status_notice(&state, false).contains("上次触发: 从未"));

        state.enabled = true;
        state.last_trigger_at = 1_700_000_000_000;
        let rendered = status_notice(&state, true);
        assert!(rendered.starts_with("交流模式: 开启\n- 模式: duo\n- 轮数: 1\n- 冷却: 8000ms"));
        assert!(rendered.contains("上次触发: 2023-11-14 22:13:20 UTC"));
        assert!(rendered.ends_with("- 进行中: 是"));
    }
}
