//! API module for all HTTP handlers
//!
//! Marketplace endpoints are grouped by the policy that guards them; the
//! general policy wraps everything under `/api`.

pub mod handlers;
pub mod stats;

use axum::{
    Router,
    routing::{get, post},
};

use crate::SharedState;
use crate::policy::PolicyName;

pub use handlers::{create_ad, login, register, root, search, send_message};
pub use stats::{get_stats, status};

pub fn build_router(state: SharedState) -> Router {
    let auth = state.guard(PolicyName::Auth).apply(
        Router::new()
            .route("/auth/login", post(login))
            .route("/auth/register", post(register)),
    );
    let posting = state
        .guard(PolicyName::Posting)
        .apply(Router::new().route("/ads", post(create_ad)));
    let messaging = state
        .guard(PolicyName::Messaging)
        .apply(Router::new().route("/messages", post(send_message)));
    let searching = state
        .guard(PolicyName::Search)
        .apply(Router::new().route("/search", get(search)));

    let api = Router::new()
        .route("/status", get(status))
        .route("/rate-limit/stats", get(get_stats))
        .merge(auth)
        .merge(posting)
        .merge(messaging)
        .merge(searching);
    let api = state.guard(PolicyName::General).apply(api);

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .with_state(state)
}
