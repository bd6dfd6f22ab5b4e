//! attest-daemon entry point.
//!
//! Thin on purpose: load env and config, pick the backend, spawn the
//! background loops, serve the router. Handlers live in `routes.rs`, shared
//! state in `state.rs`. Any boot failure is returned from `main` and ends
//! the process.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use attest_audit::AuditSink;
use attest_daemon::{routes, state};
use attest_orders::NotificationSink;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = attest_config::load_from_env().context("config load failed")?;
    let secrets = attest_config::resolve_secrets(&loaded.settings)?;
    let issuer = state::issuer_from_settings(&loaded.settings.issuance, &secrets)?;
    let backend = state::Backend::from_env().await?;
    info!(
        config_hash = %loaded.config_hash,
        backend = backend.name,
        issuer = ?loaded.settings.issuance.kind,
        "attest-daemon booting"
    );

    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if let Some(path) = &loaded.settings.audit.path {
        let sink = AuditSink::open(path, loaded.settings.audit.hash_chain)
            .with_context(|| format!("open audit log {path}"))?;
        sinks.push(Arc::new(sink));
    }

    let shared = Arc::new(state::AppState::build(
        loaded.settings,
        Some(loaded.config_hash),
        backend,
        issuer,
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_dispatcher(Arc::clone(&shared), sinks);
    state::spawn_session_sweeper(
        shared.sessions.clone(),
        Duration::from_secs(shared.settings.sessions.sweep_interval_secs),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("attest-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("ATTEST_DAEMON_ADDR").ok()?.parse().ok()
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

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
