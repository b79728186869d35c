use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use xchat_gateway::{
    AgentGateway, AgentTurnReply, AgentTurnRequest, GatewayError, GroupActivation, RelayBackend,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RecordedCall {
    Agent {
        backend: RelayBackend,
        request: AgentTurnRequest,
    },
    Patch {
        backend: RelayBackend,
        key: String,
        activation: GroupActivation,
    },
    Notice {
        to: String,
        message: String,
    },
}

/// Gateway double with queued per-backend replies and recorded calls.
pub(crate) struct ScriptedGateway {
    replies: AsyncMutex<HashMap<RelayBackend, VecDeque<Result<String, String>>>>,
    calls: AsyncMutex<Vec<RecordedCall>>,
    fail_patches: AtomicBool,
    agent_gate: Option<Semaphore>,
    agent_counter: AtomicUsize,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Agent calls wait for [`ScriptedGateway::release_agent_calls`].
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    fn build(agent_gate: Option<Semaphore>) -> Self {
        Self {
            replies: AsyncMutex::new(HashMap::new()),
            calls: AsyncMutex::new(Vec::new()),
            fail_patches: AtomicBool::new(false),
            agent_gate,
            agent_counter: AtomicUsize::new(0),
        }
    }

    pub(crate) async fn push_reply(&self, backend: RelayBackend, reply: Result<&str, &str>) {
        self.replies
            .lock()
            .await
            .entry(backend)
            .or_default()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    pub(crate) fn set_fail_patches(&self, fail: bool) {
        self.fail_patches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn release_agent_calls(&self, count: usize) {
        if let Some(gate) = &self.agent_gate {
            gate.add_permits(count);
        }
    }

    pub(crate) async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn agent_calls(&self) -> Vec<(RelayBackend, AgentTurnRequest)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Agent { backend, request } => Some((backend, request)),
                _ => None,
            })
            .collect()
    }

    pub(crate) async fn notices(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Notice { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub(crate) async fn patches(&self) -> Vec<(RelayBackend, GroupActivation)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Patch {
                    backend,
                    activation,
                    ..
                } => Some((backend, activation)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn run_agent(
        &self,
        backend: RelayBackend,
        request: &AgentTurnRequest,
    ) -> Result<AgentTurnReply, GatewayError> {
        self.calls.lock().await.push(RecordedCall::Agent {
            backend,
            request: request.clone(),
        });
        if let Some(gate) = &self.agent_gate {
            gate.acquire()
                .await
                .map_err(|_| GatewayError::ConnectionClosed)?
                .forget();
        }
        let scripted = self
            .replies
            .lock()
            .await
            .get_mut(&backend)
            .and_then(VecDeque::pop_front);
        let sequence = self.agent_counter.fetch_add(1, Ordering::SeqCst);
        match scripted {
            Some(Ok(text)) => Ok(AgentTurnReply {
                text,
                meta: Value::Null,
            }),
            Some(Err(payload)) => Err(GatewayError::AgentFailed {
                backend: backend.to_string(),
                payload,
            }),
            None => Ok(AgentTurnReply {
                text: format!("{backend}-reply-{sequence}"),
                meta: Value::Null,
            }),
        }
    }

    async fn patch_session(
        &self,
        backend: RelayBackend,
        session_key: &str,
        activation: GroupActivation,
    ) -> Result<(), GatewayError> {
        self.calls.lock().await.push(RecordedCall::Patch {
            backend,
            key: session_key.to_string(),
            activation,
        });
        if self.fail_patches.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                method: "sessions.patch".to_string(),
                message: "session not found".to_string(),
            });
        }
        Ok(())
    }

    async fn send_notice(&self, to: &str, message: &str) -> Result<(), GatewayError> {
        self.calls.lock().await.push(RecordedCall::Notice {
            to: to.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}
