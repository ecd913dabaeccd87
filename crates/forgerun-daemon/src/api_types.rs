//! Request and response types for forgerun-daemon's HTTP endpoints (§6:
//! "Responses are always JSON bodies of the shape `{ok, event, delivery,
//! processed, ignored, retryable_failures, failures, results}` or
//! `{ok, error}`"). No business logic lives here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /healthz and the webhook path's GET liveness payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Generic error envelope — used for every non-2xx webhook response.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-PR dispatch outcome, one entry per `results[]`.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrDispatchResult {
    pub pr_number: i64,
    /// "processed" | "ignored" | "retryable"
    pub outcome: String,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// POST <webhook path>
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub event: String,
    pub delivery: String,
    pub duplicate_delivery: bool,
    pub processed: u32,
    pub ignored: u32,
    pub retryable_failures: u32,
    pub failures: Vec<String>,
    pub results: Vec<PrDispatchResult>,
}

impl WebhookResponse {
    pub fn duplicate(event: &str, delivery: &str) -> Self {
        Self {
            ok: true,
            event: event.to_string(),
            delivery: delivery.to_string(),
            duplicate_delivery: true,
            processed: 0,
            ignored: 0,
            retryable_failures: 0,
            failures: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn ignored_whole_delivery(event: &str, delivery: &str) -> Self {
        Self {
            ok: true,
            event: event.to_string(),
            delivery: delivery.to_string(),
            duplicate_delivery: false,
            processed: 0,
            ignored: 1,
            retryable_failures: 0,
            failures: Vec::new(),
            results: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    pub pr_number: Option<i64>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunSummary>,
}
