//! Placeholder marketplace endpoints
//!
//! The real handlers live in the marketplace service; these only acknowledge
//! the request so the guarded routes can be exercised end to end.

use axum::{Json, extract::Query, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::{Value, json};

pub async fn root() -> &'static str {
    "Thulo Bazaar rate limiter"
}

fn accepted(action: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "action": action,
        })),
    )
}

/// POST /api/auth/login
pub async fn login() -> impl IntoResponse {
    accepted("login")
}

/// POST /api/auth/register
pub async fn register() -> impl IntoResponse {
    accepted("register")
}

/// POST /api/ads
pub async fn create_ad() -> impl IntoResponse {
    accepted("create_ad")
}

/// POST /api/messages
pub async fn send_message() -> impl IntoResponse {
    accepted("send_message")
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// GET /api/search?q=...
pub async fn search(Query(params): Query<SearchQuery>) -> Json<Value> {
    Json(json!({
        "success": true,
        "query": params.q.unwrap_or_default(),
        "results": [],
    }))
}
