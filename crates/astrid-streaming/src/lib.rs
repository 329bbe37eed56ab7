//! Astrid Streaming — the multi-tenant HTTP/WebSocket façade in front of
//! an opaque agent runtime.
//!
//! This crate owns session lifecycle, ownership enforcement, request
//! enrichment, hook dispatch, checkpoint/rewind bookkeeping, cross-instance
//! interrupt signalling, and the two downstream transports (SSE and WS). It
//! never runs an agent itself — [`backend::AgentBackend`] is the seam a real
//! runtime plugs into; [`backend::NullAgentBackend`] stands in for tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod agent_runner;
pub mod api;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod checkpoint_service;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod interrupt_bus;
pub mod mcp_registry;
pub mod repository;
pub mod session_service;
pub mod stream_publisher;
pub mod webhook;

pub use agent_runner::AgentRunner;
pub use error::{ApiError, ApiResult};

use std::sync::Arc;

use astrid_mcp::McpConfigResolver;

use crate::backend::AgentBackend;
use crate::cache::Cache;
use crate::checkpoint_service::CheckpointService;
use crate::enrich::RequestEnricher;
use crate::interrupt_bus::InterruptBus;
use crate::mcp_registry::TenantMcpRegistry;
use crate::repository::SessionRepository;
use crate::session_service::SessionService;
use crate::webhook::HookDispatcher;

/// Every shared collaborator a request handler needs, constructed once at
/// startup and cloned cheaply (everything inside is an `Arc`) into each
/// request's extension set.
#[derive(Clone)]
pub struct AppState {
    pub session_service: Arc<SessionService>,
    pub checkpoint_service: Arc<CheckpointService>,
    pub interrupt_bus: Arc<InterruptBus>,
    pub mcp_registry: Arc<TenantMcpRegistry>,
    pub enricher: Arc<RequestEnricher>,
    pub runner: Arc<AgentRunner>,
    pub cache: Arc<dyn Cache>,
    /// Held directly (not just inside `runner`) so `/rewind` can open its
    /// own short-lived handle without `AgentRunner` exposing one.
    pub agent_backend: Arc<dyn AgentBackend>,
    pub heartbeat: std::time::Duration,
}

impl AppState {
    /// Assemble the application's collaborators from their already-built
    /// backing stores. Kept free of any I/O itself — callers (`main.rs`,
    /// integration tests) decide how `repo`/`cache`/`mcp_resolver`/
    /// `agent_backend` are constructed.
    #[must_use]
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        cache: Arc<dyn Cache>,
        mcp_resolver: Arc<McpConfigResolver>,
        agent_backend: Arc<dyn AgentBackend>,
        heartbeat: std::time::Duration,
    ) -> Self {
        let session_service = Arc::new(SessionService::new(repo.clone(), cache.clone()));
        let checkpoint_service = Arc::new(CheckpointService::new(repo));
        let interrupt_bus = Arc::new(InterruptBus::new(cache.clone()));
        let mcp_registry = Arc::new(TenantMcpRegistry::new(cache.clone()));
        let enricher = Arc::new(RequestEnricher::new(mcp_resolver));
        let hooks = Arc::new(HookDispatcher::new());
        let runner = Arc::new(AgentRunner::new(
            session_service.clone(),
            checkpoint_service.clone(),
            interrupt_bus.clone(),
            hooks,
            agent_backend.clone(),
        ));
        Self {
            session_service,
            checkpoint_service,
            interrupt_bus,
            mcp_registry,
            enricher,
            runner,
            cache,
            agent_backend,
            heartbeat,
        }
    }
}
