//! API-key authentication and per-IP rate limiting for the facade's HTTP
//! surface.
//!
//! Two credentials are in play, not one:
//! - the caller's own API key (the `Authorization: Bearer <key>` header on
//!   every request) — its SHA-256 hash becomes the tenant identity used for
//!   session ownership throughout the rest of the crate;
//! - `AppConfig.api_key`, a single operator-configured secret. When
//!   `trust_proxy_headers` is `false` (closed deployments), the caller's
//!   bearer value must equal it exactly (constant-time compare) — this is
//!   the single-tenant smoke-test topology. When `trust_proxy_headers` is
//!   `true`, an upstream proxy is assumed to have already authenticated the
//!   caller and rewritten the header to that caller's own resolved key, so
//!   this layer trusts it outright; only the hash is taken. Either way, the
//!   header value presented at request time is what gets hashed.
//!
//! Grounded on the bearer-token + `governor` per-IP rate-limit middleware
//! pattern: failed attempts consume rate-limit tokens, successful ones
//! don't, loopback is exempt from the limiter.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ApiError;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// The tenant identity attached to a request after successful auth: the
/// hex-encoded SHA-256 hash of the caller's presented API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantHash(pub String);

impl std::fmt::Display for TenantHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded SHA-256 of an API key. The only hashing used for ownership
/// anywhere in this crate.
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

#[derive(Clone)]
pub struct AuthState {
    api_key: Arc<str>,
    trust_proxy_headers: bool,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(api_key: impl Into<Arc<str>>, trust_proxy_headers: bool) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(5).expect("5 > 0"))
            .allow_burst(NonZeroU32::new(2).expect("2 > 0"));
        Self {
            api_key: api_key.into(),
            trust_proxy_headers,
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }
}

/// Axum middleware entry point. Requires `ConnectInfo<SocketAddr>` to be
/// available (set via `into_make_service_with_connect_info`).
pub async fn bearer_auth_mw(
    State(state): State<AuthState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let presented = extract_bearer(req.headers()).map(str::to_owned);
    let Some(presented) = presented.filter(|s| !s.is_empty()) else {
        return ApiError::InvalidApiKey.into_response();
    };

    if !state.trust_proxy_headers && !constant_time_eq(presented.as_bytes(), state.api_key.as_bytes()) {
        if !is_loopback(addr.ip()) && state.limiter.check_key(&addr.ip()).is_err() {
            tracing::warn!(ip = %addr.ip(), "rate limit exceeded after repeated auth failures");
            return ApiError::RateLimited.into_response();
        }
        tracing::warn!(ip = %addr.ip(), "authentication failed");
        return ApiError::InvalidApiKey.into_response();
    }

    req.extensions_mut().insert(TenantHash(hash_api_key(&presented)));
    next.run(req).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_from_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer tenant-a-key".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("tenant-a-key"));
    }

    #[test]
    fn extract_bearer_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());
    }

    #[test]
    fn hash_is_deterministic_and_hex() {
        let hash = hash_api_key("tenant-a-key");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_api_key("tenant-a-key"));
    }

    #[test]
    fn distinct_keys_hash_differently() {
        assert_ne!(hash_api_key("tenant-a-key"), hash_api_key("tenant-b-key"));
    }

    #[test]
    fn loopback_v4_is_loopback() {
        assert!(is_loopback(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn non_loopback_is_not_loopback() {
        assert!(!is_loopback("203.0.113.5".parse().unwrap()));
    }
}
