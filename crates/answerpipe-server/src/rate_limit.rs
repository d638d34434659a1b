use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::{NoOpMiddleware, StateInformationMiddleware};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use serde::Serialize;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_LIMIT: u64 = 100;
pub const DEFAULT_WINDOW_S: u64 = 600;

#[derive(thiserror::Error, Debug)]
pub enum RateLimitError {
    #[error("rate limiter backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the key is back to full capacity (allowed) or may retry
    /// (rejected).
    pub reset: u64,
}

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str) -> Result<RateDecision, RateLimitError>;
}

type KeyedLimiter<C> =
    governor::RateLimiter<String, DefaultKeyedStateStore<String>, C, StateInformationMiddleware>;

/// Per-key GCRA limiter: `limit` requests may burst at once, and capacity refills evenly
/// over `window`.
pub struct GovernorLimiter<C: Clock = DefaultClock> {
    limit: u32,
    refill: Duration,
    clock: C,
    inner: KeyedLimiter<C>,
}

impl GovernorLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self::with_clock(limit, window, DefaultClock::default())
    }
}

impl<C: Clock> GovernorLimiter<C> {
    pub fn with_clock(limit: u64, window: Duration, clock: C) -> Self {
        let burst = NonZeroU32::new(limit.clamp(1, u32::MAX as u64) as u32).unwrap_or(NonZeroU32::MIN);
        let refill = (window / burst.get()).max(Duration::from_nanos(1));
        let quota = Quota::with_period(refill)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        let inner =
            governor::RateLimiter::<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<C::Instant>>::new(
                quota,
                DefaultKeyedStateStore::default(),
                &clock,
            )
                .with_middleware::<StateInformationMiddleware>();
        Self {
            limit: burst.get(),
            refill,
            clock,
            inner,
        }
    }

    /// Decide for `key`, reporting `reset` relative to the caller's epoch-ms clock.
    pub fn check_at(&self, key: &str, now_ms: u64) -> RateDecision {
        let limit = self.limit as u64;
        match self.inner.check_key(&key.to_string()) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity() as u64;
                let refill_ms = self.refill.as_millis() as u64;
                RateDecision {
                    allowed: true,
                    limit,
                    remaining,
                    reset: now_ms.saturating_add((limit - remaining.min(limit)).saturating_mul(refill_ms)),
                }
            }
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                RateDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset: now_ms.saturating_add(wait.as_millis() as u64),
                }
            }
        }
    }

    /// Keys currently holding limiter state.
    pub fn tracked_keys(&self) -> usize {
        self.inner.len()
    }

    /// Forget keys whose capacity has fully refilled.
    pub fn retain_recent(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }
}

impl<C: Clock + Send + Sync + 'static> GovernorLimiter<C> {
    /// Prune idle keys every `every` until the returned task is aborted.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
            tick.tick().await;
            loop {
                tick.tick().await;
                let before = limiter.tracked_keys();
                limiter.retain_recent();
                tracing::debug!(before, after = limiter.tracked_keys(), "rate limiter pruned");
            }
        })
    }
}

impl Default for GovernorLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, Duration::from_secs(DEFAULT_WINDOW_S))
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[async_trait::async_trait]
impl<C: Clock + Send + Sync> RateLimiter for GovernorLimiter<C> {
    async fn check(&self, key: &str) -> Result<RateDecision, RateLimitError> {
        Ok(self.check_at(key, now_epoch_ms()))
    }
}

fn first_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let v = headers.get(name)?.to_str().ok()?;
    let first = v.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Client identifier: proxy headers first, then the socket peer, else `"unknown"`.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    first_header_value(headers, "x-forwarded-for")
        .or_else(|| first_header_value(headers, "cf-connecting-ip"))
        .or_else(|| first_header_value(headers, "x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_rate_headers(headers: &mut HeaderMap, d: &RateDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(d.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(d.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(d.reset),
    );
}

/// Gate every request on the limiter before it reaches a handler.
pub async fn enforce(
    State(limiter): State<Arc<dyn RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_ip(&request);
    match limiter.check(&key).await {
        Ok(d) if d.allowed => {
            let mut resp = next.run(request).await;
            set_rate_headers(resp.headers_mut(), &d);
            resp
        }
        Ok(d) => {
            tracing::info!(client = %key, limit = d.limit, "rate limit exceeded");
            let mut resp = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Rate limit exceeded. Please try again later.",
                    "limit": d.limit,
                    "remaining": d.remaining,
                    "reset": d.reset,
                })),
            )
                .into_response();
            set_rate_headers(resp.headers_mut(), &d);
            resp
        }
        Err(e) => {
            tracing::error!(error = %e, "error in rate limiting middleware");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal server error. Please try again later.",
                })),
            )
                .into_response()
        }
    }
}
