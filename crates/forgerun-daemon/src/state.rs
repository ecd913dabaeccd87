//! Shared runtime state for forgerun-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use forgerun_audit::AuditWriter;
use forgerun_hosting::GithubClient;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};

use crate::config::DaemonConfig;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    /// A run's lifecycle state changed, whether via webhook, sync worker,
    /// or a command applied elsewhere.
    RunTransition {
        run_id: String,
        event: String,
        from_state: String,
        to_state: String,
    },
    LogLine {
        level: String,
        msg: String,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers and the
/// background sync worker.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Embedded storage engine connection pool (§5/§6).
    pub pool: SqlitePool,
    /// Append-only audit sink; serialized behind a mutex because
    /// `AuditWriter` tracks hash-chain state across calls.
    pub audit: Arc<Mutex<AuditWriter>>,
    /// Hosting-service client for the synchronization worker. `None` when
    /// no GitHub token was configured and the worker is effectively idle.
    pub hosting: Option<GithubClient>,
    pub config: Arc<DaemonConfig>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        audit: AuditWriter,
        hosting: Option<GithubClient>,
        config: DaemonConfig,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "forgerun-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            pool,
            audit: Arc::new(Mutex::new(audit)),
            hosting,
            config: Arc::new(config),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
