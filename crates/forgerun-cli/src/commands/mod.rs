//! Command handler modules for forgerun-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod gate;
pub mod run;
pub mod sync;

use anyhow::{Context, Result};
use forgerun_schemas::RunMode;
use serde_json::Value;
use std::fs;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a CLI `--mode` string into a [`RunMode`].
pub fn parse_run_mode(mode: &str) -> Result<RunMode> {
    RunMode::parse(&mode.trim().to_lowercase())
        .with_context(|| format!("invalid --mode '{mode}'. expected one of: push-only"))
}

/// Load a JSON payload from either an inline string or a file path.
pub fn load_payload(payload: Option<String>, payload_file: Option<String>) -> Result<Value> {
    if let Some(p) = payload_file {
        let bytes = fs::read(&p).with_context(|| format!("read payload-file failed: {p}"))?;
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        let raw = String::from_utf8(bytes.to_vec()).context("payload-file must be UTF-8 text")?;
        let v: Value = serde_json::from_str(raw.trim()).context("payload-file must contain valid JSON")?;
        return Ok(v);
    }

    let raw = payload.context("must provide --payload or --payload-file")?;
    let v: Value = serde_json::from_str(raw.trim()).context("--payload must be valid JSON")?;
    Ok(v)
}
