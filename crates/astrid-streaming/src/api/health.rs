//! GET `/api/v1/health`. Unauthenticated by design (a load balancer probe
//! carries no bearer token).

use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::AppState;

const PING_KEY: &str = "health:ping";

/// Round-trip the cache to confirm it's reachable. There's no equivalent
/// repository ping exposed through `SessionService`, so cache health is the
/// whole of this check — a down Postgres with a healthy Redis still answers
/// "ok" here and fails loudly on the first real request instead.
pub async fn health(Extension(app): Extension<AppState>) -> impl IntoResponse {
    let cache_ok = app
        .cache
        .set_json(PING_KEY, &Value::Bool(true), std::time::Duration::from_secs(5))
        .await
        .is_ok();

    let status = if cache_ok { "ok" } else { "degraded" };
    Json(json!({ "status": status, "cache": cache_ok }))
}
