//! Shared runtime state for attest-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Background loops
//! (heartbeat, outbox dispatch, session sweep) are spawned from here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use attest_config::{IssuanceSettings, IssuerKind, ResolvedSecrets, Settings};
use attest_db::{PgOrderStore, PgOutbox};
use attest_issuer_http::HttpIssuer;
use attest_issuer_paper::PaperIssuer;
use attest_orders::{
    Lifecycle, MemoryOrderStore, MemoryOutbox, NotificationSink, OrderStore, Outbox,
    OutboxDispatcher, OutboxEntry, StatusCounts,
};
use attest_protocol::{Ed25519Verifier, InboundRouter, IssuanceService, VerificationProtocol};
use attest_schemas::Notification;
use attest_session::SessionStore;

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    Notification { outbox_id: i64, notification: Notification },
    LogLine { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
            BusMsg::Notification { .. } => "notification",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "memory" | "postgres"
    pub backend: String,
    pub config_hash: Option<String>,
    pub orders: StatusCounts,
    pub sessions: usize,
}

/// Order store plus outbox, chosen once at boot.
#[derive(Clone)]
pub struct Backend {
    pub name: &'static str,
    pub store: Arc<dyn OrderStore>,
    pub outbox: Arc<dyn Outbox>,
}

impl Backend {
    pub fn memory() -> Self {
        Self {
            name: "memory",
            store: Arc::new(MemoryOrderStore::new()),
            outbox: Arc::new(MemoryOutbox::new()),
        }
    }

    /// Postgres when `ATTEST_DATABASE_URL` is set, memory otherwise.
    /// Migrations run before the store is handed out.
    pub async fn from_env() -> Result<Self> {
        if std::env::var(attest_db::ENV_DB_URL).is_err() {
            tracing::warn!("{} not set; using in-memory order store", attest_db::ENV_DB_URL);
            return Ok(Self::memory());
        }
        let pool = attest_db::connect_from_env().await?;
        attest_db::migrate(&pool).await?;
        Ok(Self {
            name: "postgres",
            store: Arc::new(PgOrderStore::new(pool.clone())),
            outbox: Arc::new(PgOutbox::new(pool)),
        })
    }
}

/// Issuer named by `issuance.kind`.
pub fn issuer_from_settings(
    settings: &IssuanceSettings,
    secrets: &ResolvedSecrets,
) -> Result<Arc<dyn IssuanceService>> {
    Ok(match settings.kind {
        IssuerKind::Paper => Arc::new(PaperIssuer::new()),
        IssuerKind::Http => Arc::new(
            HttpIssuer::from_settings(settings, secrets).context("http issuer init failed")?,
        ),
    })
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub settings: Settings,
    pub config_hash: Option<String>,
    pub backend: &'static str,
    pub lifecycle: Lifecycle,
    pub outbox: Arc<dyn Outbox>,
    pub sessions: Arc<SessionStore>,
    pub inbound: Arc<InboundRouter>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Default settings, memory backend, paper issuer.
    pub fn new() -> Self {
        Self::build(
            Settings::default(),
            None,
            Backend::memory(),
            Arc::new(PaperIssuer::new()),
        )
    }

    pub fn build(
        settings: Settings,
        config_hash: Option<String>,
        backend: Backend,
        issuer: Arc<dyn IssuanceService>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let lifecycle = Lifecycle::new(backend.store, backend.outbox.clone())
            .with_claim_ttl_secs(settings.orders.issuance_claim_ttl_secs);
        let protocol = VerificationProtocol::new(
            lifecycle.clone(),
            Arc::new(Ed25519Verifier),
            issuer,
        )
        .with_deployment(settings.deployment.clone())
        .with_max_attributes(settings.orders.max_attributes);
        let sessions = Arc::new(SessionStore::with_ttl_secs(settings.sessions.ttl_secs));
        let inbound = Arc::new(InboundRouter::new(Arc::new(protocol), sessions.clone()));

        Self {
            bus,
            build: BuildInfo {
                service: "attest-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            settings,
            config_hash,
            backend: backend.name,
            lifecycle,
            outbox: backend.outbox,
            sessions,
            inbound,
        }
    }

    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        Ok(StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            backend: self.backend.to_string(),
            config_hash: self.config_hash.clone(),
            orders: self.lifecycle.counts().await?,
            sessions: self.sessions.len(),
        })
    }

    pub fn log_line(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }

    /// Dispatcher wired to the SSE bus plus any extra sinks.
    pub fn dispatcher(&self, extra: Vec<Arc<dyn NotificationSink>>) -> OutboxDispatcher {
        let mut d = OutboxDispatcher::new(self.outbox.clone(), self.settings.outbox.batch_size)
            .with_sink(Arc::new(BusSink {
                bus: self.bus.clone(),
            }));
        for sink in extra {
            d = d.with_sink(sink);
        }
        d
    }
}

/// Publishes delivered notifications on the SSE bus. Having no subscribers
/// is not a failure.
pub struct BusSink {
    bus: broadcast::Sender<BusMsg>,
}

#[async_trait]
impl NotificationSink for BusSink {
    fn name(&self) -> &str {
        "bus"
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
        let _ = self.bus.send(BusMsg::Notification {
            outbox_id: entry.id,
            notification: entry.notification.clone(),
        });
        Ok(())
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval(interval));
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// `tokio::time::interval` panics on a zero period.
fn tick_interval(d: Duration) -> Duration {
    d.max(Duration::from_millis(1))
}

/// Drain the outbox every `outbox.dispatch_interval_ms`. A failed batch is
/// logged and retried on the next tick.
pub fn spawn_dispatcher(state: Arc<AppState>, extra: Vec<Arc<dyn NotificationSink>>) {
    let dispatcher = state.dispatcher(extra);
    let interval = tick_interval(Duration::from_millis(state.settings.outbox.dispatch_interval_ms));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match dispatcher.run_once().await {
                Ok(r) if r.failed > 0 => {
                    tracing::warn!(delivered = r.delivered, failed = r.failed, "outbox batch");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "outbox dispatch failed"),
            }
        }
    });
}

/// Evict idle sessions every `sessions.sweep_interval_secs`.
pub fn spawn_session_sweeper(sessions: Arc<SessionStore>, interval: Duration) {
    let interval = tick_interval(interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sessions.evict_expired(chrono::Utc::now()) {
                Ok(0) => {}
                Ok(n) => tracing::info!(evicted = n, "expired sessions evicted"),
                Err(e) => tracing::error!(error = %e, "session sweep failed"),
            }
        }
    });
}
