//! Authentication and rate limiting middleware.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{Quota, RateLimiter};
use lru::LruCache;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

use super::types::{AuthMethod, ServerConfig};
use super::ServerState;

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

pub type IpRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Maximum number of per-IP rate limiter entries to keep in the LRU cache.
const MAX_RATE_LIMITER_ENTRIES: std::num::NonZeroUsize = match std::num::NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Key used for rate limiting. IPv6 addresses are masked to /64 so a client
/// cannot dodge the limit by rotating through its own prefix.
fn limiter_key(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            IpAddr::V6(Ipv6Addr::new(seg[0], seg[1], seg[2], seg[3], 0, 0, 0, 0))
        }
    }
}

/// Get or create a rate limiter for the given IP.
pub async fn get_rate_limiter(
    config: &ServerConfig,
    rate_limiters: &Mutex<LruCache<IpAddr, Arc<IpRateLimiter>>>,
    ip: IpAddr,
) -> Option<Arc<IpRateLimiter>> {
    let rpm = NonZeroU32::new(config.rate_limit_rpm)?;
    let key = limiter_key(ip);

    let mut limiters = rate_limiters.lock().await;

    if let Some(limiter) = limiters.get(&key) {
        return Some(Arc::clone(limiter));
    }

    let quota = Quota::per_minute(rpm);
    let limiter = Arc::new(RateLimiter::direct(quota));
    limiters.push(key, Arc::clone(&limiter));

    Some(limiter)
}

pub fn new_rate_limiter_cache() -> Mutex<LruCache<IpAddr, Arc<IpRateLimiter>>> {
    Mutex::new(LruCache::new(MAX_RATE_LIMITER_ENTRIES))
}

/// Reject requests from clients over their per-minute quota.
pub async fn rate_limit_middleware(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = get_rate_limiter(&state.config, &state.rate_limiters, addr.ip()).await {
        if limiter.check().is_err() {
            state.usage.record_error();
            tracing::debug!(ip = %addr.ip(), "rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "success": false,
                    "error": format!(
                        "Rate limit exceeded. Maximum {} requests per minute.",
                        state.config.rate_limit_rpm
                    ),
                })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Auth middleware
// ---------------------------------------------------------------------------

/// Bearer token authentication.
///
/// With an `api_key` configured, a matching token sets [`AuthMethod::ApiKey`]
/// and anything else is a 401. Without one, every request passes as
/// [`AuthMethod::Open`].
pub async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(ref expected_key) = state.config.api_key {
        let provided_token = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        match provided_token {
            Some(ref token) if token.as_bytes().ct_eq(expected_key.as_bytes()).into() => {
                request.extensions_mut().insert(AuthMethod::ApiKey);
            }
            Some(_) => {
                state.usage.record_error();
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({
                        "success": false,
                        "error": "Invalid API key"
                    })),
                )
                    .into_response();
            }
            None => {
                state.usage.record_error();
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({
                        "success": false,
                        "error": "Missing Authorization header. Use: Authorization: Bearer <api_key>"
                    })),
                )
                    .into_response();
            }
        }
    } else {
        request.extensions_mut().insert(AuthMethod::Open);
    }

    next.run(request).await
}
