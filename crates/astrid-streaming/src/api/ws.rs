//! GET `/api/v1/query/ws`: the WebSocket variant of `/query`. One
//! connection carries exactly one agent invocation — the first inbound
//! `prompt` message starts it, subsequent `interrupt`/`answer` messages
//! act on the session it opened.

use std::collections::HashMap;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent_runner;
use crate::auth::TenantHash;
use crate::enrich::{InboundRequest, DEFAULT_CWD, DEFAULT_MODEL};
use crate::stream_publisher::{run_ws, WsClientMessage};
use crate::AppState;

/// GET `/api/v1/query/ws`
pub async fn query_ws(
    ws: WebSocketUpgrade,
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app, tenant))
}

async fn handle_socket(socket: WebSocket, app: AppState, tenant: TenantHash) {
    let (downstream_tx, downstream_rx) = tokio::sync::mpsc::channel(agent_runner::QUEUE_DEPTH);
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel(16);
    let cancel = CancellationToken::new();

    let bridge = tokio::spawn(run_ws(socket, downstream_rx, inbound_tx, app.heartbeat, cancel.clone()));

    let Some(WsClientMessage::Prompt { prompt }) = inbound_rx.recv().await else {
        cancel.cancel();
        let _ = bridge.await;
        return;
    };

    let session = match app
        .session_service
        .create(DEFAULT_MODEL, DEFAULT_CWD, None, tenant.0.clone(), Value::Null)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "failed to create session for WS connection");
            cancel.cancel();
            let _ = bridge.await;
            return;
        }
    };

    let request = InboundRequest {
        prompt,
        model: None,
        cwd: None,
        system_prompt: None,
        allowed_tools: Vec::new(),
        denied_tools: Vec::new(),
        env: HashMap::new(),
        mcp_servers: None,
        permission_mode: None,
        checkpointing_enabled: false,
        output_schema: None,
        hooks: HashMap::new(),
    };

    let tenant_mcp = app.mcp_registry.resolved_tier(&tenant.0).await.unwrap_or_default();
    let options = match app.enricher.enrich(request, &tenant_mcp, None, None) {
        Ok(options) => options,
        Err(err) => {
            tracing::warn!(error = %err, "failed to enrich WS prompt");
            cancel.cancel();
            let _ = bridge.await;
            return;
        }
    };

    let session_id = session.id;
    let owner_hash = tenant.0.clone();
    let runner = app.runner.clone();
    let run_cancel = cancel.clone();
    let run_task = tokio::spawn(async move {
        runner.run(session_id, owner_hash, options, downstream_tx, run_cancel).await;
    });

    while let Some(msg) = inbound_rx.recv().await {
        match msg {
            WsClientMessage::Interrupt => {
                if let Err(err) = app.interrupt_bus.signal(session_id).await {
                    tracing::warn!(error = %err, session_id = %session_id, "failed to signal interrupt over WS");
                }
            }
            WsClientMessage::Prompt { .. } | WsClientMessage::Answer { .. } => {
                tracing::debug!(session_id = %session_id, "ignoring mid-stream control message, one prompt per connection");
            }
        }
    }

    let _ = run_task.await;
    let _ = bridge.await;
}
