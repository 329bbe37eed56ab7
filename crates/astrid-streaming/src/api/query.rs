//! The four endpoints that start or continue an agent invocation:
//! `/query`, `/query/single`, `/sessions/{id}/resume`, `/sessions/{id}/fork`.
//!
//! All four funnel through [`start_run`], which differs only in which
//! session id they hand it and whether that session already exists.

use std::convert::Infallible;

use axum::extract::Path;
use axum::response::sse::Event as SseEvent;
use axum::response::Sse;
use axum::{Extension, Json};
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent_runner;
use crate::auth::TenantHash;
use crate::domain::Session;
use crate::enrich::InboundRequest;
use crate::error::ApiResult;
use crate::stream_publisher::{self, DownstreamEvent};
use crate::AppState;

/// Resolve the tenant's MCP tier, enrich the request into `AgentOptions`,
/// and spawn `AgentRunner::run` in the background. The caller decides what
/// to do with the returned receiver (wire it to SSE, or drain it to
/// completion for an aggregated response).
async fn start_run(
    app: &AppState,
    session_id: astrid_core::types::SessionId,
    owner_hash: String,
    body: InboundRequest,
    resume_session_id: Option<Uuid>,
    parent_session_id: Option<Uuid>,
) -> ApiResult<mpsc::Receiver<DownstreamEvent>> {
    let tenant_mcp = app.mcp_registry.resolved_tier(&owner_hash).await?;
    let options = app.enricher.enrich(body, &tenant_mcp, resume_session_id, parent_session_id)?;

    let (tx, rx) = mpsc::channel(agent_runner::QUEUE_DEPTH);
    let cancel = CancellationToken::new();
    let runner = app.runner.clone();
    tokio::spawn(async move {
        runner.run(session_id, owner_hash, options, tx, cancel).await;
    });
    Ok(rx)
}

/// POST `/api/v1/query`: always creates a fresh session.
pub async fn query(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Json(body): Json<InboundRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let session = new_session(&app, &tenant, &body).await?;
    let rx = start_run(&app, session.id, tenant.0, body, None, None).await?;
    Ok(stream_publisher::sse_response(rx, app.heartbeat))
}

/// POST `/api/v1/query/single`: runs the same path as `/query` but drains
/// the stream internally and returns one aggregated JSON body instead of an
/// SSE stream.
pub async fn query_single(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Json(body): Json<InboundRequest>,
) -> ApiResult<Json<Value>> {
    let session = new_session(&app, &tenant, &body).await?;
    let mut rx = start_run(&app, session.id, tenant.0, body, None, None).await?;
    Ok(Json(aggregate(session.id, &mut rx).await))
}

/// POST `/api/v1/sessions/{id}/resume`: continues an existing, owned
/// session with a new prompt.
pub async fn resume(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
    Json(body): Json<InboundRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let session = app.session_service.get(id.into(), &tenant.0).await?;
    let rx = start_run(&app, session.id, tenant.0, body, Some(id), None).await?;
    Ok(stream_publisher::sse_response(rx, app.heartbeat))
}

/// POST `/api/v1/sessions/{id}/fork`: starts a brand new session whose
/// `parent_session_id` points at an existing, owned one. The agent runtime
/// receives the parent as `resume_session_id` so it can seed state from it,
/// exactly as a resume would, but the conversation is recorded separately.
pub async fn fork(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
    Json(body): Json<InboundRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let parent = app.session_service.get(id.into(), &tenant.0).await?;
    let forked = app
        .session_service
        .create(parent.model.clone(), parent.cwd.clone(), Some(parent.id), tenant.0.clone(), json!({}))
        .await?;
    let rx = start_run(&app, forked.id, tenant.0, body, Some(id), Some(id)).await?;
    Ok(stream_publisher::sse_response(rx, app.heartbeat))
}

async fn new_session(app: &AppState, tenant: &TenantHash, body: &InboundRequest) -> ApiResult<Session> {
    app.session_service
        .create(
            body.model.clone().unwrap_or_else(|| crate::enrich::DEFAULT_MODEL.to_string()),
            body.cwd.clone().unwrap_or_else(|| crate::enrich::DEFAULT_CWD.to_string()),
            None,
            tenant.0.clone(),
            Value::Null,
        )
        .await
}

async fn aggregate(session_id: astrid_core::types::SessionId, rx: &mut mpsc::Receiver<DownstreamEvent>) -> Value {
    let mut messages = Vec::new();
    let mut result = None;
    let mut error = None;

    while let Some(event) = rx.recv().await {
        match event {
            DownstreamEvent::Message(payload) => messages.push(serde_json::to_value(&payload).expect("serializes")),
            DownstreamEvent::Result(payload) => result = Some(serde_json::to_value(&payload).expect("serializes")),
            DownstreamEvent::Error(payload) => error = Some(serde_json::to_value(&payload).expect("serializes")),
            DownstreamEvent::Done(_) => break,
            DownstreamEvent::Init(_) | DownstreamEvent::Partial { .. } | DownstreamEvent::Question(_) => {}
        }
    }

    json!({ "session_id": session_id, "messages": messages, "result": result, "error": error })
}
