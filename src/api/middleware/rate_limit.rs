use crate::core::error::{ErrorResponse, RentError};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Sliding-window request limiter keyed by client IP
///
/// Each request drops timestamps older than the window, then is rejected if
/// the remaining count has reached the limit and recorded otherwise.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    requests: Arc<RwLock<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    /// `name` identifies the protected endpoint in logs
    pub fn new(name: &'static str, max_requests: usize, window_seconds: u64) -> Self {
        Self {
            name,
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
            trust_proxy_headers: false,
        }
    }

    /// Key clients on forwarding headers set by a trusted reverse proxy
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub async fn check(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let history = requests.entry(ip).or_default();

        history.retain(|&at| now.duration_since(at) < self.window);

        if history.len() >= self.max_requests {
            // The oldest entry is the next to leave the window
            let retry_after = history
                .first()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)).as_secs())
                .unwrap_or(1)
                .max(1);

            tracing::warn!(limiter = self.name, client_ip = %ip, retry_after, "Rate limit exceeded");
            return Err(RateLimitError {
                limit: self.max_requests,
                window_seconds: self.window.as_secs(),
                retry_after,
            });
        }

        history.push(now);
        Ok(())
    }

    /// Forget clients with no requests inside the window
    pub async fn cleanup_expired(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        requests.retain(|_, history| {
            history.retain(|&at| now.duration_since(at) < self.window);
            !history.is_empty()
        });
    }

    /// Periodically run `cleanup_expired` until the runtime shuts down
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                limiter.cleanup_expired().await;
            }
        })
    }
}

#[derive(Debug)]
pub struct RateLimitError {
    pub limit: usize,
    pub window_seconds: u64,
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let error = RentError::RateLimited(format!(
            "Too many requests. Maximum {} requests per {} seconds allowed",
            self.limit, self.window_seconds
        ));
        let body = ErrorResponse::with_details(
            error.error_type().to_string(),
            error.public_message(),
            serde_json::json!({
                "limit": self.limit,
                "window_seconds": self.window_seconds,
                "retry_after": self.retry_after,
            }),
        );

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after));
        response
    }
}

/// Rate limiting middleware; attach with `from_fn_with_state(limiter, ..)`
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = if limiter.trust_proxy_headers {
        forwarded_ip(request.headers()).or(peer)
    } else {
        peer
    }
    .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    limiter.check(client_ip).await?;
    Ok(next.run(request).await)
}

/// Client address reported by a proxy: first `X-Forwarded-For` hop, then
/// `X-Real-IP`
///
/// Clients can write these headers freely, so they are only consulted when
/// the limiter trusts its proxy.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded.or_else(real_ip)
}
