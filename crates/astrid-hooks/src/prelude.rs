//! Prelude module — commonly used types for convenient import.
//!
//! Use `use astrid_hooks::prelude::*;` to import all essential types.

pub use crate::{Decision, WebhookClient, WebhookDecision, WebhookError, WebhookPayload};
pub use crate::WebhookRegistration;
