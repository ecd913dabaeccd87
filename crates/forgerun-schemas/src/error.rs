//! Stable error taxonomy for the core (see SPEC_FULL.md §7).
//!
//! Every variant here is a value the core can produce deliberately, not an
//! escape hatch for unexpected failures — those are wrapped by callers with
//! `anyhow::Context` at the boundary instead of being added here.

use thiserror::Error;

use crate::state::RunState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("duplicate event for run {run_id}, idempotency key {idempotency_key}")]
    DuplicateEvent {
        run_id: String,
        idempotency_key: String,
    },

    #[error("payload too large: {actual_bytes} bytes exceeds {max_bytes}")]
    PayloadTooLarge { max_bytes: u64, actual_bytes: u64 },

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("retryable infrastructure failure: {0}")]
    RetryableInfrastructureFailure(String),

    #[error("pr_number already linked for run {run_id}: {existing}")]
    PrAlreadyLinked { run_id: String, existing: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    /// `true` for errors the webhook ingress error policy (§4.4 step 9)
    /// treats as a per-PR retryable outcome rather than a hard rejection.
    pub fn is_retryable_dispatch_failure(&self) -> bool {
        !matches!(self, CoreError::IllegalTransition { .. })
    }
}
