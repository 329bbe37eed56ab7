//! Prelude module — commonly used types for convenient import.
//!
//! Use `use astrid_core::prelude::*;` to import all essential types.

pub use crate::{AgentId, Permission, RiskLevel, SessionId, Timestamp, TokenId};
pub use crate::{RetryConfig, RetryOutcome, retry};
pub use crate::HookEvent;
pub use crate::truncate_to_boundary;
