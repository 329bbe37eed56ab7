//! Request-scoped correlation context.

use tracing::Span;
use uuid::Uuid;

/// Carries a correlation id and component/operation names through a single
/// request, tying every log line it produces to one `tracing::Span`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: Uuid,
    component: String,
    operation: Option<String>,
}

impl RequestContext {
    /// Start a context for `component`, generating a fresh correlation id.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            component: component.into(),
            operation: None,
        }
    }

    /// Adopt an existing correlation id (e.g. from an inbound request
    /// header) instead of generating one.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Record the operation name this context covers.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// The correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Build the `tracing::Span` carrying this context's fields.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            correlation_id = %self.correlation_id,
            component = %self.component,
            operation = self.operation.as_deref().unwrap_or("unspecified"),
        )
    }

    /// Enter the span for the remainder of the current scope, returning a
    /// guard that exits it on drop.
    #[must_use]
    pub fn enter(&self) -> RequestGuard {
        RequestGuard {
            _entered: self.span().entered(),
        }
    }
}

/// Guard returned by [`RequestContext::enter`]; exits the span on drop.
pub struct RequestGuard {
    _entered: tracing::span::EnteredSpan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_explicit_correlation_id() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::new("session_service").with_correlation_id(id);
        assert_eq!(ctx.correlation_id(), id);
    }

    #[test]
    fn defaults_to_a_fresh_random_id() {
        let a = RequestContext::new("session_service");
        let b = RequestContext::new("session_service");
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn enter_guard_can_be_dropped_immediately() {
        let ctx = RequestContext::new("session_service").with_operation("resume");
        let _guard = ctx.enter();
    }
}
