//! axum middleware that enforces a named policy on a group of routes

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::policy::RateLimitPolicy;
use crate::rate_limit::{Decision, RateLimiter, now_ms};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Body returned with a 429
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub success: bool,
    pub message: String,
    pub retry_after: i64,
}

/// A policy bound to the shared limiter
#[derive(Clone)]
pub struct PolicyGuard {
    limiter: Arc<RateLimiter>,
    policy: Arc<RateLimitPolicy>,
    trust_proxy: bool,
    namespace_keys: bool,
}

impl PolicyGuard {
    pub fn new(
        limiter: Arc<RateLimiter>,
        policy: RateLimitPolicy,
        trust_proxy: bool,
        namespace_keys: bool,
    ) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
            trust_proxy,
            namespace_keys,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Key the request is stored under in the shared limiter
    pub fn storage_key<B>(&self, request: &Request<B>) -> String {
        let key = self.policy.key.derive_key(request, self.trust_proxy);
        if self.namespace_keys {
            format!("{}:{}", self.policy.name, key)
        } else {
            key
        }
    }

    pub fn check<B>(&self, request: &Request<B>, now: i64) -> (String, Decision) {
        let key = self.storage_key(request);
        let decision = self
            .limiter
            .evaluate(&key, self.policy.max, self.policy.window_ms, now);
        (key, decision)
    }

    /// Wraps every route of `router` with this policy
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, enforce))
    }
}

/// Whole seconds until `reset_time`, rounded up
pub fn retry_after_secs(reset_time: i64, now: i64) -> i64 {
    let remaining_ms = (reset_time - now).max(0);
    (remaining_ms + 999) / 1000
}

/// ISO-8601 rendering of a millisecond timestamp
pub fn format_reset(reset_time: i64) -> Option<String> {
    DateTime::from_timestamp_millis(reset_time)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Sets the rate-limit headers unless an inner guard already did, so the
/// policy closest to the route is the one reported.
pub fn apply_headers(headers: &mut HeaderMap, limit: u32, decision: &Decision) {
    if headers.contains_key(HEADER_LIMIT) {
        return;
    }
    headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(reset) = format_reset(decision.reset_time)
        .and_then(|iso| HeaderValue::from_str(&iso).ok())
    {
        headers.insert(HEADER_RESET, reset);
    }
}

pub async fn enforce(State(guard): State<PolicyGuard>, request: Request, next: Next) -> Response {
    let now = now_ms();
    let (key, decision) = guard.check(&request, now);

    let mut response = if decision.allowed {
        trace!(
            policy = %guard.policy.name,
            key = %key,
            remaining = decision.remaining,
            "Request admitted"
        );
        next.run(request).await
    } else {
        warn!(
            policy = %guard.policy.name,
            key = %key,
            "Rate limit exceeded"
        );
        let body = Rejection {
            success: false,
            message: guard.policy.message.clone(),
            retry_after: retry_after_secs(decision.reset_time, now),
        };
        (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
    };

    apply_headers(response.headers_mut(), guard.policy.max, &decision);
    response
}
