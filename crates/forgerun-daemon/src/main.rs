//! forgerun-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, opens the
//! storage engine, builds the shared state, wires middleware, and starts
//! the HTTP server. All route handlers live in `routes.rs`; all shared
//! state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use forgerun_daemon::{config::DaemonConfig, routes, state, sync_worker};
use forgerun_hosting::GithubClient;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if absent;
    // production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = load_config()?;

    let pool = forgerun_store::connect_from_env().await.context("connect to storage engine")?;
    forgerun_store::migrate(&pool).await.context("run storage migrations")?;

    let audit = forgerun_audit::AuditWriter::new(&config.audit_log_path, true).context("open audit log")?;

    let hosting = config
        .github_token
        .clone()
        .map(GithubClient::new)
        .transpose()
        .context("construct GitHub hosting client")?;

    let shared = Arc::new(state::AppState::new(pool, audit, hosting, config));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(5));
    sync_worker::spawn(Arc::clone(&shared));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("forgerun-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn load_config() -> anyhow::Result<DaemonConfig> {
    match std::env::var(forgerun_daemon::config::ENV_CONFIG_PATHS) {
        Ok(paths) if !paths.trim().is_empty() => {
            let paths: Vec<_> = paths.split(',').map(str::trim).collect();
            let loaded = forgerun_config::load_layered_yaml(&paths).context("load layered config")?;
            DaemonConfig::from_loaded(&loaded)
        }
        _ => {
            info!(
                "{} not set; running with a permissive default config (signature enforcement off)",
                forgerun_daemon::config::ENV_CONFIG_PATHS
            );
            Ok(DaemonConfig::permissive_default())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("FORGERUN_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
