//! Dispatches registered webhooks and applies the event-aware fail-open /
//! fail-closed policy.
//!
//! Grounded on the host project's command-handler execute-and-map pattern
//! (timeout wrapping, structured result mapping, tracing instrumentation)
//! — here adapted to a single HTTP transport instead of spawned
//! subprocesses, since `Command`/`Wasm`/`Agent` handlers have no
//! counterpart in this crate.

use crate::decision::WebhookDecision;
use crate::redact::redact_url;
use crate::registration::WebhookRegistration;
use astrid_core::{HookEvent, SessionId};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{instrument, warn};

/// Error calling a webhook. Always caught by [`WebhookClient::invoke`] and
/// translated into a decision per the event's fail-open/fail-closed
/// policy — never propagated to callers.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The HTTP call itself failed (connect, TLS, timeout, transport).
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The call completed but the response body wasn't a valid decision.
    #[error("webhook returned an invalid response: {0}")]
    InvalidResponse(serde_json::Error),
    /// The call exceeded its configured timeout.
    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),
}

/// The outbound payload sent to a webhook for a given event firing.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    /// Event name (`PreToolUse`, `Stop`, ...).
    pub event: HookEvent,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Correlation id for tracing the request end to end.
    pub correlation_id: String,
    /// Tool name, present only for `PreToolUse`/`PostToolUse`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool input, present only for `PreToolUse`/`PostToolUse`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Event-specific free-form payload (prompt text, error message, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Dispatches webhooks over HTTP and enforces the fail-open/fail-closed
/// contract: `PreToolUse` denies on any error (connect failure, timeout,
/// non-2xx, malformed body); every other event allows.
pub struct WebhookClient {
    http: reqwest::Client,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    /// Build a client. A single `reqwest::Client` is reused across calls
    /// so connections are pooled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Fire `registration` for `payload`, applying the matcher, the
    /// per-call timeout, and the fail-open/fail-closed policy.
    ///
    /// Returns `None` when the matcher rejects the call (the webhook
    /// wasn't invoked at all — not a decision one way or the other).
    #[instrument(skip(self, payload), fields(event = %payload.event.as_str(), url = %redact_url(&registration.url)))]
    pub async fn invoke(
        &self,
        registration: &WebhookRegistration,
        payload: &WebhookPayload,
    ) -> Option<WebhookDecision> {
        if let Some(tool_name) = &payload.tool_name {
            if !registration.matches_tool(tool_name) {
                return None;
            }
        }

        match self.call(registration, payload).await {
            Ok(decision) => Some(decision),
            Err(err) => {
                if registration.event.fails_closed() {
                    warn!(error = %err, "webhook call failed, failing closed");
                    Some(WebhookDecision::deny(format!(
                        "webhook error: {err}"
                    )))
                } else {
                    warn!(error = %err, "webhook call failed, failing open");
                    Some(WebhookDecision::allow())
                }
            }
        }
    }

    async fn call(
        &self,
        registration: &WebhookRegistration,
        payload: &WebhookPayload,
    ) -> Result<WebhookDecision, WebhookError> {
        let timeout = registration.timeout();
        let mut request = self.http.post(&registration.url).json(payload);
        for (key, value) in &registration.headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| WebhookError::Timeout(timeout))??;

        let response = response.error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(WebhookError::InvalidResponse)
    }
}
