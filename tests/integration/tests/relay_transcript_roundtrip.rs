use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use xchat_gateway::{BackendEndpoint, GatewayError, GatewayRpc, RpcAgentGateway};
use xchat_relay::{
    ChatSession, ChatStateStore, MentionHandles, RelayChatHandler, RelayContext, RelayLimits,
    SharedChatStateStore,
};
use xchat_transcript::{TailOptions, TranscriptTail};

const CHAT_ID: &str = "-100";
const SESSION_KEY: &str = "agent:main:telegram:group:-100";

struct ScriptedRpc {
    label: &'static str,
    requests: AsyncMutex<Vec<(String, Value)>>,
}

impl ScriptedRpc {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            requests: AsyncMutex::new(Vec::new()),
        })
    }

    async fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|(recorded, _)| recorded == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    async fn wait_for(&self, method: &str, count: usize) -> Vec<Value> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let requests = self.requests_for(method).await;
            if requests.len() >= count {
                return requests;
            }
            assert!(
                Instant::now() < deadline,
                "{} saw {} {method} requests, expected {count}",
                self.label,
                requests.len()
            );
            sleep(Duration::from_millis(20)).await;
        }
    }
}

#[async_trait]
impl GatewayRpc for ScriptedRpc {
    async fn request(
        &self,
        method: &str,
        params: Value,
        _expect_final: bool,
    ) -> Result<Value, GatewayError> {
        let mut requests = self.requests.lock().await;
        requests.push((method.to_string(), params.clone()));
        let turn = requests
            .iter()
            .filter(|(recorded, _)| recorded == "agent")
            .count();
        match method {
            "agent" => Ok(json!({
                "status": "ok",
                "result": {
                    "payloads": [{"text": format!("{} turn {turn}", self.label)}],
                    "meta": {"backend": self.label}
                }
            })),
            "sessions.patch" => Ok(json!({"key": params["key"].clone()})),
            _ => Ok(json!({})),
        }
    }
}

struct RelayHarness {
    _workspace: TempDir,
    transcript_path: PathBuf,
    state_path: PathBuf,
    store: SharedChatStateStore,
    deepseek: Arc<ScriptedRpc>,
    glm: Arc<ScriptedRpc>,
    openclaw: Arc<ScriptedRpc>,
    tail: Option<TranscriptTail>,
}

impl RelayHarness {
    fn start(prepare: impl FnOnce(&SharedChatStateStore)) -> Self {
        let workspace = tempfile::tempdir().expect("workspace");
        let transcript_path = workspace.path().join("session.jsonl");
        std::fs::write(
            &transcript_path,
            "{\"type\":\"message\",\"message\":{\"role\":\"user\",\"content\":[{\"type\":\"text\",\"text\":\"old history\"}]}}\n",
        )
        .expect("seed transcript");
        let state_path = workspace.path().join("xchat").join("state.json");

        let store = SharedChatStateStore::new(ChatStateStore::load(
            state_path.clone(),
            RelayLimits::default(),
        ));
        store.register(CHAT_ID).expect("register chat");
        prepare(&store);

        let deepseek = ScriptedRpc::new("deepseek");
        let glm = ScriptedRpc::new("glm");
        let openclaw = ScriptedRpc::new("openclaw");
        let gateway = RpcAgentGateway::new(
            BackendEndpoint::new("deepseek", deepseek.clone()),
            BackendEndpoint::new("glm", glm.clone()),
            BackendEndpoint::new("openclaw", openclaw.clone()),
            "telegram",
        );
        let context = RelayContext::new(
            Arc::new(gateway),
            store.clone(),
            MentionHandles::default(),
            RelayLimits::default(),
        )
        .expect("relay context");
        let session = ChatSession {
            chat_id: CHAT_ID.to_string(),
            transcript_path: transcript_path.clone(),
            session_key: SESSION_KEY.to_string(),
        };
        let tail = TranscriptTail::start(
            &transcript_path,
            TailOptions {
                from_end: true,
                poll_interval: Some(Duration::from_millis(20)),
            },
            RelayChatHandler::new(session, context),
        )
        .expect("start tail");

        Self {
            _workspace: workspace,
            transcript_path,
            state_path,
            store,
            deepseek,
            glm,
            openclaw,
            tail: Some(tail),
        }
    }

    fn append(&self, record: Value) {
        append_line(&self.transcript_path, &record.to_string());
    }

    fn append_user_text(&self, text: &str) {
        self.append(json!({
            "type": "message",
            "message": {"role": "user", "content": [{"type": "text", "text": text}]}
        }));
    }

    async fn stop(mut self) {
        if let Some(tail) = self.tail.take() {
            tail.shutdown().await;
        }
    }
}

fn append_line(path: &Path, line: &str) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("open transcript");
    writeln!(file, "{line}").expect("append transcript line");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_enabled_chat_relays_user_turn_and_persists_bridge() {
    let harness = RelayHarness::start(|store| {
        store
            .update(CHAT_ID, |state| {
                state.enabled = true;
                state.bridge.last_b = "X".to_string();
            })
            .expect("enable chat");
    });

    harness.append(json!({
        "type": "message",
        "message": {"role": "assistant", "content": [{"type": "text", "text": "ignored"}]}
    }));
    harness.append_user_text(
        "Conversation info (untrusted metadata):\n```json\n{}\n```\nSender (untrusted metadata):\n```json\n{}\n```\n周末去哪儿玩？",
    );

    let deepseek_turns = harness.deepseek.wait_for("agent", 1).await;
    let glm_turns = harness.glm.wait_for("agent", 1).await;

    let a_prompt = deepseek_turns[0]["message"].as_str().expect("prompt");
    assert!(a_prompt.contains("用户说: 周末去哪儿玩？"));
    assert!(a_prompt.contains("必要时忽略): X"));
    assert!(!a_prompt.contains("old history"));
    assert_eq!(deepseek_turns[0]["sessionKey"], SESSION_KEY);
    assert_eq!(deepseek_turns[0]["replyTo"], "telegram:group:-100");

    let b_prompt = glm_turns[0]["message"].as_str().expect("prompt");
    assert!(b_prompt.contains("DeepSeek 回复: deepseek turn 1"));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let persisted = ChatStateStore::load(harness.state_path.clone(), RelayLimits::default());
        let bridge = persisted.get(CHAT_ID).map(|state| state.bridge.clone());
        if bridge.as_ref().is_some_and(|bridge| bridge.last_b == "glm turn 1") {
            let bridge = bridge.expect("bridge");
            assert_eq!(bridge.last_a, "deepseek turn 1");
            break;
        }
        assert!(Instant::now() < deadline, "bridge was not persisted");
        sleep(Duration::from_millis(20)).await;
    }

    assert!(harness.openclaw.requests_for("agent").await.is_empty());
    assert!(harness.openclaw.requests_for("send").await.is_empty());
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_on_command_patches_secondaries_and_runs_kickoff_rounds() {
    let harness = RelayHarness::start(|_| {});

    harness.append_user_text("开启交流模式");

    let deepseek_patches = harness.deepseek.wait_for("sessions.patch", 1).await;
    let glm_patches = harness.glm.wait_for("sessions.patch", 1).await;
    assert_eq!(
        deepseek_patches[0],
        json!({"key": SESSION_KEY, "groupActivation": "mention"})
    );
    assert_eq!(glm_patches[0]["groupActivation"], "mention");
    assert!(harness.openclaw.requests_for("sessions.patch").await.is_empty());

    let notices = harness.openclaw.wait_for("send", 1).await;
    assert_eq!(notices[0]["to"], "telegram:group:-100");
    assert!(notices[0]["message"]
        .as_str()
        .is_some_and(|message| message.starts_with("交流模式: 已开启")));

    let deepseek_turns = harness.deepseek.wait_for("agent", 2).await;
    harness.glm.wait_for("agent", 2).await;
    assert!(deepseek_turns[0]["message"]
        .as_str()
        .is_some_and(|message| message.contains("交流模式开场")));
    assert!(deepseek_turns[1]["message"]
        .as_str()
        .is_some_and(|message| message.contains("必要时忽略): glm turn 1")));

    let state = harness.store.snapshot(CHAT_ID).expect("snapshot");
    assert!(state.enabled);
    assert_eq!(state.rounds, 2);
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_off_command_restores_activation_and_stops_relaying() {
    let harness = RelayHarness::start(|store| {
        store
            .update(CHAT_ID, |state| state.enabled = true)
            .expect("enable chat");
    });

    harness.append_user_text("/xchat off");
    let patches = harness.deepseek.wait_for("sessions.patch", 1).await;
    assert_eq!(patches[0]["groupActivation"], Value::Null);
    let notices = harness.openclaw.wait_for("send", 1).await;
    assert_eq!(notices[0]["message"], "交流模式: 已关闭");

    harness.append_user_text("still there?");
    sleep(Duration::from_millis(300)).await;
    assert!(harness.deepseek.requests_for("agent").await.is_empty());
    assert!(!harness.store.snapshot(CHAT_ID).expect("snapshot").enabled);
    harness.stop().await;
}
