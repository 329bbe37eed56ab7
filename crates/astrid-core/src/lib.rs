//! Astrid Core — foundation types shared across the streaming session
//! engine crates.
//!
//! This crate provides:
//! - Identifier and timestamp types (`SessionId`, `AgentId`, `TokenId`,
//!   `Timestamp`)
//! - The hook event vocabulary (`HookEvent`)
//! - Retry-with-backoff helper used by session-lock acquisition
//! - Directory scaffolding for on-disk application state
//! - The environment-variable denylist used by MCP security validation

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod dirs;
pub mod env_policy;
pub mod hook_event;
pub mod retry;
pub mod types;
pub mod utils;

pub use hook_event::HookEvent;
pub use retry::{RetryConfig, RetryOutcome, retry};
pub use types::{AgentId, Permission, RiskLevel, SessionId, Timestamp, TokenId};
pub use utils::truncate_to_boundary;
