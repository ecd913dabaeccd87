//! Daemon-level configuration: layered YAML config plus the ingress and
//! hosting settings the webhook handler and sync worker need at runtime.
//! Secrets are resolved once here and never logged (see
//! `forgerun_config::secrets`).

use std::time::Duration;

use anyhow::Result;
use forgerun_config::{resolve_secrets, LoadedConfig};
use serde_json::Value;

/// Env var naming the comma-separated list of YAML config files to layer,
/// in order (later files override earlier ones).
pub const ENV_CONFIG_PATHS: &str = "FORGERUN_CONFIG_PATHS";
/// Env var naming the SQLite audit log path.
pub const ENV_AUDIT_LOG_PATH: &str = "FORGERUN_AUDIT_LOG_PATH";
/// Env var naming the GraphQL base URL override (tests point this at a mock).
pub const ENV_HOSTING_BASE_URL: &str = "FORGERUN_HOSTING_BASE_URL";

const DEFAULT_WEBHOOK_PATH: &str = "/github/webhook";
const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1_000_000;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_AUDIT_LOG_PATH: &str = "forgerun-audit.jsonl";

/// Resolved daemon configuration: ingress settings, resolved secrets, and
/// the synchronization worker's cadence.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub webhook_path: String,
    pub max_payload_bytes: u64,
    pub require_signature: bool,
    pub webhook_secret: Option<String>,
    pub github_token: Option<String>,
    pub sync_interval: Duration,
    pub audit_log_path: String,
    pub config_hash: String,
}

impl DaemonConfig {
    /// Build from an already-loaded, merged config document plus its
    /// resolved secrets.
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let secrets = resolve_secrets(&loaded.config_json)?;
        Ok(Self::from_parts(&loaded.config_json, loaded.config_hash.clone(), secrets))
    }

    fn from_parts(
        config_json: &Value,
        config_hash: String,
        secrets: forgerun_config::ResolvedSecrets,
    ) -> Self {
        let webhook_path = config_json
            .pointer("/ingress/path")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_WEBHOOK_PATH)
            .to_string();
        let max_payload_bytes = config_json
            .pointer("/ingress/max_payload_bytes")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);
        let require_signature = config_json
            .pointer("/ingress/require_signature")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let sync_interval_secs = config_json
            .pointer("/sync/interval_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        let audit_log_path = config_json
            .pointer("/audit/log_path")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_AUDIT_LOG_PATH)
            .to_string();

        Self {
            webhook_path,
            max_payload_bytes,
            require_signature,
            webhook_secret: secrets.webhook_secret,
            github_token: secrets.github_token,
            sync_interval: Duration::from_secs(sync_interval_secs),
            audit_log_path,
            config_hash,
        }
    }

    /// A permissive config used by tests and local dev when no YAML files
    /// are supplied: signature enforcement off, generous payload cap.
    pub fn permissive_default() -> Self {
        Self {
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            require_signature: false,
            webhook_secret: None,
            github_token: None,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            audit_log_path: DEFAULT_AUDIT_LOG_PATH.to_string(),
            config_hash: "unconfigured".to_string(),
        }
    }
}
