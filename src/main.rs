use bazaar_ratelimit::api::build_router;
use bazaar_ratelimit::config::{ServiceConfig, load_config};
use bazaar_ratelimit::error::RateLimitError;
use bazaar_ratelimit::logging::setup_logging;
use bazaar_ratelimit::rate_limit::RateLimiter;
use bazaar_ratelimit::AppState;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "ratelimit.toml";

async fn run(config: ServiceConfig, config_path: &str) -> Result<(), RateLimitError> {
    if !Path::new(config_path).exists() {
        warn!("Config file {:?} not found, using default policies", config_path);
    }

    let limiter = Arc::new(RateLimiter::new(config.cleanup_settings()));
    limiter.spawn_cleanup();

    let state = Arc::new(AppState::new(&config, Arc::clone(&limiter)));
    for policy in state.policies.iter() {
        info!(
            policy = %policy.name,
            window_ms = policy.window_ms,
            max = policy.max,
            key = ?policy.key,
            "Policy loaded"
        );
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on {}", config.bind_address);
    info!("Using config at {:?}", config_path);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    limiter.destroy();
    served.map_err(|e| RateLimitError::Server(e.to_string()))
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("RATE_LIMIT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
        config.bind_address = bind_address;
    }

    let _log_guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, &config_path).await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
