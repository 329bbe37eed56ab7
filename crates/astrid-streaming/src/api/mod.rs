//! `SessionControlAPI`: the axum router wiring every endpoint in the
//! façade's HTTP surface. Each handler parses its request, reads the
//! authenticated tenant hash from the request extensions (set by
//! [`crate::auth::bearer_auth_mw`]), and delegates to [`crate::AppState`]'s
//! services — this module owns transport concerns only.

pub mod health;
pub mod query;
pub mod sessions;
pub mod ws;

use axum::http::Request;
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthState;
use crate::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the full router: an unauthenticated `/api/v1/health` plus every
/// other endpoint behind [`crate::auth::bearer_auth_mw`].
///
/// `cors_origins` is forwarded as-is from [`astrid_config::AppConfig`] — an
/// empty list means no cross-origin access at all, matching the config's
/// default of "disabled until configured".
#[must_use]
pub fn router(app_state: AppState, auth_state: AuthState, cors_origins: &[String]) -> Router {
    let authenticated = Router::new()
        .route("/api/v1/query", post(query::query))
        .route("/api/v1/query/single", post(query::query_single))
        .route("/api/v1/query/ws", get(ws::query_ws))
        .route("/api/v1/sessions", get(sessions::list))
        .route("/api/v1/sessions/:id", get(sessions::get_one))
        .route("/api/v1/sessions/:id/resume", post(query::resume))
        .route("/api/v1/sessions/:id/fork", post(query::fork))
        .route("/api/v1/sessions/:id/interrupt", post(sessions::interrupt))
        .route("/api/v1/sessions/:id/answer", post(sessions::answer))
        .route("/api/v1/sessions/:id/checkpoints", get(sessions::list_checkpoints))
        .route("/api/v1/sessions/:id/rewind", post(sessions::rewind))
        .layer(axum::middleware::from_fn_with_state(auth_state, crate::auth::bearer_auth_mw));

    Router::new()
        .route("/api/v1/health", get(health::health))
        .merge(authenticated)
        .layer(Extension(app_state))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                let request_id = req
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!("request", method = %req.method(), path = %req.uri().path(), request_id)
            }),
        )
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(SetRequestIdLayer::new(axum::http::HeaderName::from_static(REQUEST_ID_HEADER), UuidRequestId))
        .layer(cors_layer(cors_origins))
}

/// Generates a fresh correlation id for requests that don't already carry
/// one, so every request's span can be tied back to a single `uuid::Uuid`
/// regardless of whether a caller or upstream proxy set `x-request-id`.
#[derive(Clone, Copy)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let parsed = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect::<Vec<_>>();
    CorsLayer::new().allow_origin(AllowOrigin::list(parsed)).allow_methods(tower_http::cors::Any)
}
