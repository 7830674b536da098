//! Fixed-window rate limiting per source IP, applied to every route.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use moka::future::Cache;

use crate::config::RateLimitingConfig;
use crate::state::AppState;

pub const LIMIT_EXCEEDED_MESSAGE: &str = "Too many requests, please try again later.";

/// Per-IP request counters. Each window is anchored at the IP's first
/// request: the counter entry expires one window after creation.
pub struct RateLimiter {
    windows: Cache<IpAddr, Arc<AtomicU32>>,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitingConfig) -> Self {
        assert!(config.max_requests > 0, "Rate limit must admit requests");
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(config.window())
            .build();
        Self {
            windows,
            max_requests: config.max_requests,
        }
    }

    /// Counts one request from `ip`; true while the window has room.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let counter = self
            .windows
            .get_with(ip, async { Arc::new(AtomicU32::new(0)) })
            .await;
        counter.fetch_add(1, AtomicOrdering::SeqCst) < self.max_requests
    }
}

/// Requester IP: first entry of the forwarding header, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

pub async fn limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer);
    if state.limiter.check(ip).await {
        next.run(request).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_MESSAGE).into_response()
    }
}
