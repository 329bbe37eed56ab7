//! Astrid Hooks — outbound webhook notifications for the streaming
//! session engine.
//!
//! A tenant registers one webhook per [`astrid_core::HookEvent`] it cares
//! about. [`WebhookClient`] fires the registered URL, applies the
//! per-event timeout, and maps any failure onto the event's fail-open or
//! fail-closed policy: `PreToolUse` denies on error since it gates a tool
//! call before it runs; every other event allows, since by the time it
//! fires the action it describes has already happened.
//!
//! # Example
//!
//! ```rust,ignore
//! use astrid_hooks::{WebhookClient, WebhookPayload, WebhookRegistration};
//! use astrid_core::{HookEvent, SessionId};
//!
//! let client = WebhookClient::new();
//! let registration = WebhookRegistration::new(HookEvent::PreToolUse, "https://example.com/hook");
//! let payload = WebhookPayload {
//!     event: HookEvent::PreToolUse,
//!     session_id: SessionId::new(),
//!     correlation_id: "req-1".into(),
//!     tool_name: Some("Write".into()),
//!     tool_input: None,
//!     data: None,
//! };
//! let decision = client.invoke(&registration, &payload);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod client;
pub mod decision;
pub mod redact;
pub mod registration;

pub use client::{WebhookClient, WebhookError, WebhookPayload};
pub use decision::{Decision, WebhookDecision};
pub use registration::WebhookRegistration;
