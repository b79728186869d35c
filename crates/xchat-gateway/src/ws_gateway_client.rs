//! Websocket request/response client for a backend gateway.
//!
//! Frames are JSON text messages. Requests carry
//! `{"type":"req","id","method","params"}`; responses carry
//! `{"type":"res","id","ok","payload","error"}`. Anything else (events,
//! unknown ids) is ignored. The socket is opened lazily and reopened on the
//! next call after it drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::{GatewayError, GatewayRpc};

const INTERIM_STATUS_ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, PartialEq)]
/// A decoded `res` frame.
pub struct GatewayResponseFrame {
    pub id: String,
    pub ok: bool,
    pub payload: Value,
    pub error_message: Option<String>,
}

impl GatewayResponseFrame {
    fn is_interim_ack(&self) -> bool {
        self.ok
            && self.payload.get("status").and_then(Value::as_str) == Some(INTERIM_STATUS_ACCEPTED)
    }
}

#[derive(Debug, Deserialize)]
struct RawGatewayFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    error: Option<Value>,
}

pub fn build_request_frame(id: &str, method: &str, params: Value) -> Value {
    json!({
        "type": "req",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Decodes one inbound text frame; returns `None` for non-response frames.
pub fn parse_gateway_frame(raw: &str) -> Result<Option<GatewayResponseFrame>, GatewayError> {
    let frame = serde_json::from_str::<RawGatewayFrame>(raw)?;
    if frame.frame_type != "res" {
        return Ok(None);
    }
    let Some(id) = frame.id.filter(|id| !id.trim().is_empty()) else {
        return Ok(None);
    };
    let error_message = frame.error.map(|error| match error {
        Value::String(message) => message,
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| other.to_string()),
    });
    Ok(Some(GatewayResponseFrame {
        id,
        ok: frame.ok.unwrap_or(false),
        payload: frame.payload,
        error_message,
    }))
}

struct PendingRequest {
    method: String,
    expect_final: bool,
    reply: oneshot::Sender<Result<Value, GatewayError>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

struct GatewayConnection {
    outbound: mpsc::UnboundedSender<WsMessage>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl GatewayConnection {
    async fn open(label: &str, url: &str) -> Result<Self, GatewayError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|error| GatewayError::Transport(format!("failed to connect {url}: {error}")))?;
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(error) = sink.send(message).await {
                    debug!(error = %error, "gateway websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader_label = label.to_string();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text.as_str().to_string(),
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        warn!(gateway = %reader_label, error = %error, "gateway websocket read failed");
                        break;
                    }
                };
                dispatch_response(&reader_pending, &text);
            }
            fail_pending(&reader_pending, &reader_alive);
            info!(gateway = %reader_label, "gateway websocket closed");
        });

        Ok(Self {
            outbound,
            pending,
            alive,
            reader,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Sends a close frame, fails outstanding requests and stops the reader.
    /// The writer exits after flushing the close frame, releasing the socket.
    fn close(&self) {
        let _ = self.outbound.send(WsMessage::Close(None));
        fail_pending(&self.pending, &self.alive);
        self.reader.abort();
    }
}

fn dispatch_response(pending: &PendingMap, raw: &str) {
    let frame = match parse_gateway_frame(raw) {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(error) => {
            debug!(error = %error, "ignoring undecodable gateway frame");
            return;
        }
    };
    let Ok(mut pending) = pending.lock() else {
        return;
    };
    let Some(entry) = pending.get(&frame.id) else {
        return;
    };
    if entry.expect_final && frame.is_interim_ack() {
        return;
    }
    let Some(entry) = pending.remove(&frame.id) else {
        return;
    };
    let result = if frame.ok {
        Ok(frame.payload)
    } else {
        Err(GatewayError::Rejected {
            method: entry.method,
            message: frame
                .error_message
                .unwrap_or_else(|| "request failed without an error message".to_string()),
        })
    };
    let _ = entry.reply.send(result);
}

fn fail_pending(pending: &PendingMap, alive: &AtomicBool) {
    let Ok(mut pending) = pending.lock() else {
        alive.store(false, Ordering::Release);
        return;
    };
    alive.store(false, Ordering::Release);
    for (_, entry) in pending.drain() {
        let _ = entry.reply.send(Err(GatewayError::ConnectionClosed));
    }
}

/// Lazily connected websocket gateway client.
pub struct WsGatewayClient {
    label: String,
    url: String,
    token: Option<String>,
    connection: AsyncMutex<Option<Arc<GatewayConnection>>>,
    next_request_id: AtomicU64,
}

impl WsGatewayClient {
    pub fn new(label: impl Into<String>, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            token: token.filter(|token| !token.trim().is_empty()),
            connection: AsyncMutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Closes the current socket; the next request reconnects.
    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close();
            info!(gateway = %self.label, "gateway websocket disconnected");
        }
    }

    async fn connection(&self) -> Result<Arc<GatewayConnection>, GatewayError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_alive() {
                return Ok(connection.clone());
            }
        }
        let connection = Arc::new(GatewayConnection::open(&self.label, &self.url).await?);
        if let Some(token) = self.token.as_deref() {
            self.exchange(
                &connection,
                "connect",
                json!({ "auth": { "token": token } }),
                false,
            )
            .await?;
        }
        info!(gateway = %self.label, url = %self.url, "gateway websocket connected");
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn exchange(
        &self,
        connection: &GatewayConnection,
        method: &str,
        params: Value,
        expect_final: bool,
    ) -> Result<Value, GatewayError> {
        let id = format!(
            "xchat-{}-{}",
            self.label,
            self.next_request_id.fetch_add(1, Ordering::Relaxed)
        );
        let (reply, response) = oneshot::channel();
        {
            let mut pending = connection
                .pending
                .lock()
                .map_err(|_| GatewayError::Transport("pending request map is poisoned".into()))?;
            if !connection.is_alive() {
                return Err(GatewayError::ConnectionClosed);
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_string(),
                    expect_final,
                    reply,
                },
            );
        }

        let frame = build_request_frame(&id, method, params).to_string();
        if connection.outbound.send(WsMessage::Text(frame.into())).is_err() {
            if let Ok(mut pending) = connection.pending.lock() {
                pending.remove(&id);
            }
            return Err(GatewayError::ConnectionClosed);
        }
        response.await.map_err(|_| GatewayError::ConnectionClosed)?
    }
}

#[async_trait]
impl GatewayRpc for WsGatewayClient {
    async fn request(
        &self,
        method: &str,
        params: Value,
        expect_final: bool,
    ) -> Result<Value, GatewayError> {
        let connection = self.connection().await?;
        self.exchange(&connection, method, params, expect_final)
            .await
    }
}
