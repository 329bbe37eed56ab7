//! Canonical downstream events and the two transports that carry them:
//! SSE (via axum's built-in `keep_alive`) and WebSocket (hand-bridged via
//! `tokio::select!`, grounded on the pack's browser-facing WS bridge).
//!
//! `AgentRunner` maps upstream agent events onto [`DownstreamEvent`] and
//! pushes them onto a bounded `mpsc` channel (depth 100); this module only
//! owns turning that channel into bytes on the wire.

use std::convert::Infallible;
use std::time::Duration;

use astrid_core::types::SessionId;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::ContentBlock;

/// One entry in an `init` event's `mcp_servers` list.
#[derive(Debug, Clone, Serialize)]
pub struct McpServerStatusEntry {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitPayload {
    pub session_id: SessionId,
    pub model: String,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<McpServerStatusEntry>,
    pub plugins: Vec<String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionPayload {
    pub question_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPayload {
    pub session_id: SessionId,
    pub is_error: bool,
    pub duration_ms: u64,
    pub num_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Always the final event of a stream.
#[derive(Debug, Clone, Serialize)]
pub struct DonePayload {
    pub reason: &'static str,
}

/// The seven canonical events from §6, tagged by their SSE `event:` name.
#[derive(Debug, Clone)]
pub enum DownstreamEvent {
    Init(InitPayload),
    Message(MessagePayload),
    Partial { delta: String },
    Question(QuestionPayload),
    Result(ResultPayload),
    Error(ErrorPayload),
    Done(DonePayload),
}

impl DownstreamEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Message(_) => "message",
            Self::Partial { .. } => "partial",
            Self::Question(_) => "question",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::Done(_) => "done",
        }
    }

    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::Init(p) => serde_json::to_value(p),
            Self::Message(p) => serde_json::to_value(p),
            Self::Partial { delta } => Ok(serde_json::json!({ "delta": delta })),
            Self::Question(p) => serde_json::to_value(p),
            Self::Result(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
            Self::Done(p) => serde_json::to_value(p),
        }
        .expect("downstream event payloads always serialize")
    }

    fn into_sse_event(self) -> SseEvent {
        SseEvent::default().event(self.name()).data(self.data().to_string())
    }

    fn into_ws_message(self) -> WsMessage {
        let envelope = serde_json::json!({ "event": self.name(), "data": self.data() });
        WsMessage::Text(envelope.to_string())
    }
}

/// Build the axum SSE response for one stream. Heartbeats use axum's
/// built-in keep-alive rather than a hand-rolled ticker — `interval` comes
/// straight from `AppConfig::stream_heartbeat_secs`.
pub fn sse_response(
    rx: mpsc::Receiver<DownstreamEvent>,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = rx;
    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
        .map(|event| Ok::<_, Infallible>(event.into_sse_event()));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
}

/// Inbound WebSocket control messages, per §6's WS variant.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    Prompt { prompt: String },
    Interrupt,
    Answer { question_id: String, answer: String },
}

/// Bridges a WebSocket connection to a downstream-event channel and an
/// inbound-control-message channel, exactly mirroring the pack's
/// `tokio::select!` browser bridge. `cancel` is triggered on client
/// disconnect so the caller's `AgentRunner` can tear down cooperatively.
pub async fn run_ws(
    mut socket: WebSocket,
    mut events: mpsc::Receiver<DownstreamEvent>,
    inbound: mpsc::Sender<WsClientMessage>,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(heartbeat);
    tick.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<WsClientMessage>(&text) {
                            Ok(parsed) => {
                                if inbound.send(parsed).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "invalid WS client message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "WS recv error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if socket.send(event.into_ws_message()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                if socket.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
}
