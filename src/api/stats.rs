//! Stats API endpoints

use axum::{Json, extract::State as AxumState};
use serde::Serialize;
use serde_json::{Value, json};

use crate::SharedState;
use crate::policy::RateLimitPolicy;

/// Limiter bookkeeping plus the active policy table
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_keys: usize,
    pub total_requests: usize,
    pub running: bool,
    pub policies: Vec<RateLimitPolicy>,
}

/// GET /api/rate-limit/stats
pub async fn get_stats(AxumState(state): AxumState<SharedState>) -> Json<StatsResponse> {
    let stats = state.limiter.get_stats();

    Json(StatsResponse {
        total_keys: stats.total_keys,
        total_requests: stats.total_requests,
        running: state.limiter.is_running(),
        policies: state.policies.iter().cloned().collect(),
    })
}

/// GET /api/status - Server status
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<Value> {
    let settings = state.limiter.settings();

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "cleanup": {
            "interval_secs": settings.interval.as_secs(),
            "max_age_secs": settings.max_age_ms / 1000,
        },
        "namespace_keys": state.namespace_keys,
        "trust_proxy": state.trust_proxy,
    }))
}
