pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod policy;
pub mod rate_limit;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use config::ServiceConfig;
use middleware::PolicyGuard;
use policy::{PolicyName, PolicySet};
use rate_limit::RateLimiter;

pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub policies: PolicySet,
    pub trust_proxy: bool,
    pub namespace_keys: bool,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: &ServiceConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            policies: config.policy_set(),
            trust_proxy: config.trust_proxy,
            namespace_keys: config.namespace_keys,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Binds the named policy to the shared limiter
    pub fn guard(&self, name: PolicyName) -> PolicyGuard {
        PolicyGuard::new(
            Arc::clone(&self.limiter),
            self.policies.get(name),
            self.trust_proxy,
            self.namespace_keys,
        )
    }
}

pub type SharedState = Arc<AppState>;
