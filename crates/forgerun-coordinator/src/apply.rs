//! Glue between the pure resolver, the transactional store, and the audit
//! sink (§4.2, §6: "audit sink ... every processed webhook delivery emits a
//! line"). This is boundary code, not library-internal logic, so it deals in
//! `anyhow::Result` rather than `CoreError` directly.

use anyhow::Result;
use forgerun_audit::AuditWriter;
use forgerun_schemas::{idempotency, EventType, RunState};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::resolve::resolve_target;

/// Outcome of one `apply` call, mirroring `forgerun_store::ApplyOutcome`
/// plus the fact that an audit line was (or wasn't) written for it.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub duplicate: bool,
    pub from_state: RunState,
    pub to_state: RunState,
}

/// Applies one event to a run: synthesizes an idempotency key if the caller
/// didn't supply one, delegates the transactional mechanics to
/// `forgerun_store::apply_event` with the §4.3 resolver injected, and writes
/// an audit-log line for every non-duplicate event.
pub async fn apply(
    pool: &SqlitePool,
    audit: &mut AuditWriter,
    run_id: &str,
    event_type: EventType,
    payload: Value,
    idempotency_key: Option<String>,
) -> Result<ApplyResult> {
    let key = idempotency_key
        .unwrap_or_else(|| idempotency::synthesize_idempotency_key(run_id, event_type.as_str(), &payload));

    let outcome =
        forgerun_store::apply_event(pool, run_id, event_type, &key, payload.clone(), resolve_target).await?;

    if !outcome.duplicate {
        audit.append(run_id, "run", event_type.as_str(), payload)?;
    }

    Ok(ApplyResult {
        duplicate: outcome.duplicate,
        from_state: outcome.from_state,
        to_state: outcome.to_state,
    })
}
