//! Binary entry point: load configuration, wire up the real collaborators,
//! and serve the HTTP/WebSocket façade.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use astrid_streaming::auth::AuthState;
use astrid_streaming::backend::NullAgentBackend;
use astrid_streaming::cache::RedisCache;
use astrid_streaming::repository::PgSessionRepository;
use astrid_streaming::{api, AppState};
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use clap::Parser;
use tokio::net::TcpListener;

/// Astrid Streaming: the multi-tenant streaming session engine.
#[derive(Debug, Parser)]
#[command(name = "astrid-streaming", about = "HTTP/WebSocket facade for the Astrid agent runtime")]
struct Args {
    /// Path to an optional TOML config file, layered under env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = astrid_config::AppConfig::load(args.config.as_deref())?;

    init_logging(config.debug)?;
    astrid_streaming::error::DEBUG_DETAILS.store(config.debug, std::sync::atomic::Ordering::Relaxed);

    tracing::info!(bind = %args.bind, debug = config.debug, "starting astrid-streaming");

    let repo: Arc<dyn astrid_streaming::repository::SessionRepository> =
        Arc::new(PgSessionRepository::connect(&config.database_url).await?);
    let cache: Arc<dyn astrid_streaming::cache::Cache> = Arc::new(RedisCache::from_url(&config.cache_url).await?);

    let mcp_resolver = Arc::new(load_mcp_resolver(&config.mcp_config_file));

    // No real agent runtime is vendored here; a deployment wires its own
    // `AgentBackend` in place of this. Kept as the façade's default so the
    // binary stays runnable end to end against the HTTP surface alone.
    let agent_backend = Arc::new(NullAgentBackend::new(Vec::new()));

    let heartbeat = Duration::from_secs(config.stream_heartbeat_secs);
    let app_state = AppState::new(repo, cache, mcp_resolver, agent_backend, heartbeat);
    let auth_state = AuthState::new(config.api_key.clone(), config.trust_proxy_headers);

    let router = api::router(app_state, auth_state, &config.cors_origins);
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    serve(args.bind, make_service).await
}

/// Pretty logs for a human at a terminal in debug mode, JSON lines
/// otherwise, matching `astrid-telemetry`'s own `LogConfig` builder rather
/// than reaching for `setup_default_logging`'s fixed defaults.
fn init_logging(debug: bool) -> anyhow::Result<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| if debug { "debug".to_string() } else { "info".to_string() });
    let format = if debug { astrid_telemetry::LogFormat::Pretty } else { astrid_telemetry::LogFormat::Json };
    let config = astrid_telemetry::LogConfig::new(level).with_format(format).with_directive("tower_http=info");
    astrid_telemetry::setup_logging(&config)?;
    Ok(())
}

fn load_mcp_resolver(path: &std::path::Path) -> astrid_mcp::McpConfigResolver {
    match astrid_mcp::McpConfigResolver::load(path) {
        Ok(resolver) => resolver,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "no application-tier MCP config, starting with an empty tier");
            astrid_mcp::McpConfigResolver::empty()
        }
    }
}

async fn serve(
    addr: SocketAddr,
    make_service: IntoMakeServiceWithConnectInfo<axum::Router, SocketAddr>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("installing Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
