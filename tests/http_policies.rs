use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, Response, StatusCode};
use bazaar_ratelimit::AppState;
use bazaar_ratelimit::api::build_router;
use bazaar_ratelimit::config::{ServiceConfig, parse_config};
use bazaar_ratelimit::middleware::{HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
use bazaar_ratelimit::policy::AuthenticatedUser;
use bazaar_ratelimit::rate_limit::RateLimiter;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(config: &ServiceConfig) -> (Router, Arc<RateLimiter>) {
    let limiter = Arc::new(RateLimiter::new(config.cleanup_settings()));
    let state = Arc::new(AppState::new(config, Arc::clone(&limiter)));
    (build_router(state), limiter)
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn as_user(mut req: Request<Body>, id: &str) -> Request<Body> {
    req.extensions_mut().insert(AuthenticatedUser { id: id.into() });
    req
}

fn from_ip(mut req: Request<Body>, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response.headers()[name].to_str().unwrap()
}

#[tokio::test]
async fn admitted_requests_carry_rate_limit_headers() {
    let (app, _) = app_with(&ServiceConfig::default());

    let response = send(&app, request(Method::GET, "/api/status")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, HEADER_LIMIT), "1000");
    assert_eq!(header(&response, HEADER_REMAINING), "999");
    assert!(header(&response, HEADER_RESET).ends_with('Z'));
}

#[tokio::test]
async fn root_is_not_rate_limited() {
    let (app, limiter) = app_with(&ServiceConfig::default());

    let response = send(&app, request(Method::GET, "/")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(HEADER_LIMIT).is_none());
    assert_eq!(limiter.get_stats().total_keys, 0);
}

#[tokio::test]
async fn messaging_quota_returns_429_with_retry_after() {
    let (app, _) = app_with(&ServiceConfig::default());

    for remaining in (0..5).rev() {
        let response = send(&app, as_user(request(Method::POST, "/api/messages"), "9")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(header(&response, HEADER_REMAINING), remaining.to_string());
    }

    let response = send(&app, as_user(request(Method::POST, "/api/messages"), "9")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, HEADER_LIMIT), "5");
    assert_eq!(header(&response, HEADER_REMAINING), "0");

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Too many messages sent, please slow down.");
    let retry_after = body["retryAfter"].as_i64().unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn users_have_independent_posting_quotas() {
    let config = parse_config("[policies.posting]\nmax = 1\n").unwrap();
    let (app, _) = app_with(&config);

    let first = send(&app, as_user(request(Method::POST, "/api/ads"), "1")).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = send(&app, as_user(request(Method::POST, "/api/ads"), "1")).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = send(&app, as_user(request(Method::POST, "/api/ads"), "2")).await;
    assert_eq!(other.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn auth_policy_keys_on_ip_even_when_signed_in() {
    let config = parse_config("[policies.auth]\nmax = 2\n").unwrap();
    let (app, _) = app_with(&config);

    let login = |user: &str| {
        as_user(
            from_ip(request(Method::POST, "/api/auth/login"), "198.51.100.4:4000"),
            user,
        )
    };

    for user in ["a", "b"] {
        assert_eq!(send(&app, login(user)).await.status(), StatusCode::ACCEPTED);
    }

    let req = login("c");
    assert_eq!(send(&app, req).await.status(), StatusCode::TOO_MANY_REQUESTS);

    let req = from_ip(request(Method::POST, "/api/auth/register"), "198.51.100.5:4000");
    assert_eq!(send(&app, req).await.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn stacked_routes_report_the_route_policy() {
    let config = parse_config("[policies.posting]\nmax = 2\n[policies.auth]\nmax = 1\n").unwrap();
    let (app, _) = app_with(&config);

    for remaining in ["1", "0"] {
        let response = send(&app, as_user(request(Method::POST, "/api/ads"), "3")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(header(&response, HEADER_LIMIT), "2");
        assert_eq!(header(&response, HEADER_REMAINING), remaining);
    }
    let response = send(&app, as_user(request(Method::POST, "/api/ads"), "3")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, HEADER_LIMIT), "2");
    assert_eq!(header(&response, HEADER_REMAINING), "0");

    let response = send(&app, request(Method::POST, "/api/auth/login")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header(&response, HEADER_LIMIT), "1");
    assert_eq!(header(&response, HEADER_REMAINING), "0");

    let response = send(&app, request(Method::POST, "/api/auth/login")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, HEADER_LIMIT), "1");
    assert_eq!(header(&response, HEADER_REMAINING), "0");

    // routes guarded only by the general policy still report it
    let response = send(&app, request(Method::GET, "/api/status")).await;
    assert_eq!(header(&response, HEADER_LIMIT), "1000");
}

#[tokio::test]
async fn general_policy_counts_inner_denials() {
    let config = parse_config(
        r#"
        [policies.general]
        max = 3

        [policies.search]
        max = 1
        "#,
    )
    .unwrap();
    let (app, _) = app_with(&config);

    let statuses = [
        send(&app, request(Method::GET, "/api/search?q=bike")).await.status(),
        send(&app, request(Method::GET, "/api/search?q=bike")).await.status(),
        send(&app, request(Method::GET, "/api/status")).await.status(),
        send(&app, request(Method::GET, "/api/status")).await.status(),
    ];

    assert_eq!(
        statuses,
        [
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn stats_endpoint_reports_namespaced_keys() {
    let (app, _) = app_with(&ServiceConfig::default());

    send(&app, as_user(request(Method::POST, "/api/ads"), "1")).await;
    let response = send(&app, request(Method::GET, "/api/rate-limit/stats")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    // general:unknown (ads + this call) and posting:user_1
    assert_eq!(body["totalKeys"], 2);
    assert_eq!(body["totalRequests"], 3);
    assert_eq!(body["running"], false);
    assert_eq!(body["policies"].as_array().unwrap().len(), 5);
    assert_eq!(body["policies"][1]["name"], "posting");
    assert_eq!(body["policies"][1]["windowMs"], 300_000);
}

#[tokio::test]
async fn shared_keyspace_lets_policies_collide() {
    let config = parse_config(
        r#"
        namespace_keys = false

        [policies.general]
        max = 2
        "#,
    )
    .unwrap();
    let (app, limiter) = app_with(&config);

    // general and posting both store under "unknown"
    let response = send(&app, request(Method::POST, "/api/ads")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(limiter.get_stats().total_keys, 1);
    assert_eq!(limiter.get_stats().total_requests, 2);

    let response = send(&app, request(Method::GET, "/api/status")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_header_selects_client() {
    let config = parse_config("trust_proxy = true\n[policies.general]\nmax = 1\n").unwrap();
    let (app, _) = app_with(&config);

    let forwarded = |ip: &str| {
        let mut req = from_ip(request(Method::GET, "/api/status"), "127.0.0.1:9000");
        req.headers_mut()
            .insert("X-Forwarded-For", ip.parse().unwrap());
        req
    };

    assert_eq!(send(&app, forwarded("203.0.113.1")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, forwarded("203.0.113.2")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, forwarded("203.0.113.1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
