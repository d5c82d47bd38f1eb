//! Named rate-limit policies and the request keys they are tracked under

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Key used when neither a user nor a client address can be determined
pub const UNKNOWN_KEY: &str = "unknown";

/// Identity attached to a request by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyName {
    General,
    Posting,
    Messaging,
    Auth,
    Search,
}

impl PolicyName {
    pub const ALL: [PolicyName; 5] = [
        PolicyName::General,
        PolicyName::Posting,
        PolicyName::Messaging,
        PolicyName::Auth,
        PolicyName::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::General => "general",
            PolicyName::Posting => "posting",
            PolicyName::Messaging => "messaging",
            PolicyName::Auth => "auth",
            PolicyName::Search => "search",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the rate-limit key is derived from a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Client IP address
    Ip,
    /// `user_<id>` for authenticated requests, client IP otherwise
    UserOrIp,
}

impl KeyStrategy {
    pub fn derive_key<B>(&self, request: &Request<B>, trust_proxy: bool) -> String {
        if *self == KeyStrategy::UserOrIp {
            if let Some(user) = request.extensions().get::<AuthenticatedUser>() {
                return format!("user_{}", user.id);
            }
        }
        client_ip(request, trust_proxy).unwrap_or_else(|| UNKNOWN_KEY.to_string())
    }
}

/// Resolves the client address, preferring `X-Forwarded-For` behind a proxy.
pub fn client_ip<B>(request: &Request<B>, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        if let Some(ip) = forwarded_for(request.headers()) {
            return Some(ip);
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}

/// A fixed quota bound to a group of routes. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    pub name: PolicyName,
    pub window_ms: i64,
    pub max: u32,
    pub key: KeyStrategy,
    #[serde(skip)]
    pub message: String,
}

impl RateLimitPolicy {
    /// Reference quota for each named policy
    pub fn default_for(name: PolicyName) -> Self {
        let (window_secs, max, key, message) = match name {
            PolicyName::General => (
                15 * 60,
                1000,
                KeyStrategy::Ip,
                "Too many requests from this IP, please try again later.",
            ),
            PolicyName::Posting => (
                5 * 60,
                10,
                KeyStrategy::UserOrIp,
                "Too many ads posted, please wait before posting again.",
            ),
            PolicyName::Messaging => (
                60,
                5,
                KeyStrategy::UserOrIp,
                "Too many messages sent, please slow down.",
            ),
            PolicyName::Auth => (
                15 * 60,
                20,
                KeyStrategy::Ip,
                "Too many authentication attempts, please try again later.",
            ),
            PolicyName::Search => (
                60,
                100,
                KeyStrategy::UserOrIp,
                "Too many search requests, please slow down.",
            ),
        };
        Self {
            name,
            window_ms: window_secs * 1000,
            max,
            key,
            message: message.to_string(),
        }
    }
}

/// The full table of named policies.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: Vec<RateLimitPolicy>,
}

impl PolicySet {
    pub fn new(policies: Vec<RateLimitPolicy>) -> Self {
        Self { policies }
    }

    pub fn get(&self, name: PolicyName) -> RateLimitPolicy {
        self.policies
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap_or_else(|| RateLimitPolicy::default_for(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateLimitPolicy> {
        self.policies.iter()
    }

    /// Longest window across all policies, in milliseconds
    pub fn max_window_ms(&self) -> i64 {
        self.policies.iter().map(|p| p.window_ms).max().unwrap_or(0)
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new(
            PolicyName::ALL
                .iter()
                .map(|&name| RateLimitPolicy::default_for(name))
                .collect(),
        )
    }
}
