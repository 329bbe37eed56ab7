//! Webhook registration — the subscriber-facing shape of a hook.
//!
//! A tenant (or the application operator) registers a webhook for one of
//! the seven [`astrid_core::HookEvent`] events. Grounded on the host
//! project's `Hook`/`HookMatcher` shape (a URL, headers, matcher, timeout),
//! narrowed to the streaming session engine's HTTP-only contract — the
//! original `Command`/`Wasm`/`Agent` handler variants have no counterpart
//! here.

use astrid_core::HookEvent;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Minimum accepted per-hook timeout.
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// Maximum accepted per-hook timeout.
pub const MAX_TIMEOUT_SECS: u64 = 300;
/// Timeout applied when a registration doesn't specify one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A registered outbound webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Event this webhook fires on.
    pub event: HookEvent,
    /// URL to call.
    pub url: String,
    /// Extra headers to send (e.g. an authorization header for the
    /// receiving side; never logged verbatim — see `crate::redact`).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional regex evaluated against the tool name; when present and
    /// non-matching, the webhook is skipped entirely.
    #[serde(default, with = "matcher_serde")]
    pub tool_matcher: Option<Regex>,
    /// Per-call timeout in seconds, clamped to `[MIN_TIMEOUT_SECS,
    /// MAX_TIMEOUT_SECS]`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl WebhookRegistration {
    /// Create a registration with the default timeout and no matcher.
    #[must_use]
    pub fn new(event: HookEvent, url: impl Into<String>) -> Self {
        Self {
            event,
            url: url.into(),
            headers: HashMap::new(),
            tool_matcher: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the tool-name matcher.
    ///
    /// # Errors
    /// Returns an error if `pattern` is not a valid regex.
    pub fn with_tool_matcher(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.tool_matcher = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Set the per-call timeout in seconds, clamped to the allowed range.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self
    }

    /// Resolved timeout as a `Duration`, clamped to the allowed range even
    /// if the stored value somehow fell outside it (defensive — the value
    /// may have been deserialized from an untrusted store record).
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }

    /// Whether this webhook should fire for the given tool name.
    ///
    /// Absent matcher means "always fires"; this method only applies to
    /// events carrying a tool name (`PreToolUse`/`PostToolUse`).
    #[must_use]
    pub fn matches_tool(&self, tool_name: &str) -> bool {
        self.tool_matcher
            .as_ref()
            .is_none_or(|re| re.is_match(tool_name))
    }
}

mod matcher_serde {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Regex>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_ref().map(Regex::as_str).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Regex>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern: Option<String> = Option::deserialize(deserializer)?;
        pattern
            .map(|p| Regex::new(&p).map_err(serde::de::Error::custom))
            .transpose()
    }
}
