//! Axum router and all HTTP handlers for forgerun-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so tests can compose the
//! router directly via `tower::ServiceExt::oneshot`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_LENGTH, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{ErrorResponse, HealthResponse, ListRunsResponse, PrDispatchResult, RunSummary, WebhookResponse},
    state::{AppState, BusMsg},
    webhook,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook_path = state.config.webhook_path.clone();

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/events", get(stream))
        .route("/v1/runs", get(list_runs))
        .route(&webhook_path, get(webhook_liveness).post(webhook_post))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

pub(crate) async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("no route for this path")))
}

// ---------------------------------------------------------------------------
// GET <webhook path> — liveness payload (§6)
// ---------------------------------------------------------------------------

pub(crate) async fn webhook_liveness(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST <webhook path> — the §4.4 ingress contract
// ---------------------------------------------------------------------------

fn err(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(msg))).into_response()
}

pub(crate) async fn webhook_post(State(st): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    // Step 2: size guard.
    if let Some(cl) = headers.get(CONTENT_LENGTH) {
        match cl.to_str().ok().and_then(|s| s.parse::<u64>().ok()) {
            None => return err(StatusCode::BAD_REQUEST, "Content-Length header does not parse as an integer"),
            Some(n) if n > st.config.max_payload_bytes => {
                return err(StatusCode::PAYLOAD_TOO_LARGE, "payload exceeds configured max_payload_bytes")
            }
            _ => {}
        }
    }
    if body.len() as u64 > st.config.max_payload_bytes {
        return err(StatusCode::PAYLOAD_TOO_LARGE, "payload exceeds configured max_payload_bytes");
    }

    // Step 3: required headers.
    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(StatusCode::BAD_REQUEST, "missing required header X-GitHub-Event"),
    };
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| webhook::synthesize_delivery_id(&event_type, &body));

    // Step 4: signature.
    if st.config.require_signature || st.config.webhook_secret.is_some() {
        let Some(secret) = &st.config.webhook_secret else {
            return err(StatusCode::UNAUTHORIZED, "signature enforcement enabled but no secret configured");
        };
        let sig_ok = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .map(|sig| webhook::verify_signature(secret, &body, sig))
            .unwrap_or(false);
        if !sig_ok {
            return err(StatusCode::UNAUTHORIZED, "missing or invalid X-Hub-Signature-256");
        }
    }

    // Step 5: replay defense.
    let body_sha = webhook::sha256_hex(&body);
    let inserted =
        match forgerun_store::insert_webhook_delivery(&st.pool, "github", &delivery_id, &event_type, &body_sha).await
        {
            Ok(v) => v,
            Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("storage error: {e}")),
        };
    if !inserted {
        return (StatusCode::OK, Json(WebhookResponse::duplicate(&event_type, &delivery_id))).into_response();
    }

    // Step 6: JSON parse.
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            let _ = forgerun_store::release_webhook_delivery(&st.pool, "github", &delivery_id).await;
            return err(StatusCode::BAD_REQUEST, "request body is not valid JSON");
        }
    };

    // Step 7: dispatch — locate (owner, repo) and candidate PR numbers.
    let Some((owner, repo)) = webhook::extract_owner_repo(&payload) else {
        return (
            StatusCode::OK,
            Json(WebhookResponse::ignored_whole_delivery(&event_type, &delivery_id)),
        )
            .into_response();
    };
    let pr_numbers = webhook::extract_pr_numbers(&event_type, &payload);
    if pr_numbers.is_empty() {
        return (
            StatusCode::OK,
            Json(WebhookResponse::ignored_whole_delivery(&event_type, &delivery_id)),
        )
            .into_response();
    }

    // Step 8/9: per-PR application.
    let mut processed = 0u32;
    let mut ignored = 0u32;
    let mut retryable = 0u32;
    let mut failures = Vec::new();
    let mut results = Vec::new();

    for (index, pr_number) in pr_numbers.iter().copied().enumerate() {
        let outcome = dispatch_one(&st, &owner, &repo, pr_number, &event_type, &delivery_id, index, &payload).await;
        match outcome {
            Ok(PrOutcome::Processed { from_state, to_state }) => {
                processed += 1;
                let _ = st.bus.send(BusMsg::RunTransition {
                    run_id: format!("{owner}/{repo}#{pr_number}"),
                    event: event_type.clone(),
                    from_state: from_state.clone(),
                    to_state: to_state.clone(),
                });
                results.push(PrDispatchResult {
                    pr_number,
                    outcome: "processed".to_string(),
                    detail: format!("{from_state} -> {to_state}"),
                });
            }
            Ok(PrOutcome::Ignored(detail)) => {
                ignored += 1;
                results.push(PrDispatchResult { pr_number, outcome: "ignored".to_string(), detail });
            }
            Err(detail) => {
                retryable += 1;
                failures.push(format!("pr {pr_number}: {detail}"));
                warn!(pr_number, %event_type, %detail, "webhook dispatch retryable failure");
            }
        }
    }

    // Step 10: response.
    if retryable > 0 {
        let _ = forgerun_store::release_webhook_delivery(&st.pool, "github", &delivery_id).await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(WebhookResponse {
                ok: false,
                event: event_type,
                delivery: delivery_id,
                duplicate_delivery: false,
                processed,
                ignored,
                retryable_failures: retryable,
                failures,
                results,
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(WebhookResponse {
            ok: true,
            event: event_type,
            delivery: delivery_id,
            duplicate_delivery: false,
            processed,
            ignored,
            retryable_failures: 0,
            failures,
            results,
        }),
    )
        .into_response()
}

enum PrOutcome {
    Processed { from_state: String, to_state: String },
    Ignored(String),
}

/// Resolves and applies one `(event_type, pr_number)` pair (§4.4 step 8/9).
async fn dispatch_one(
    st: &AppState,
    owner: &str,
    repo: &str,
    pr_number: i64,
    event_type: &str,
    delivery_id: &str,
    index: usize,
    payload: &Value,
) -> Result<PrOutcome, String> {
    let run = forgerun_store::find_latest_run_for_pr(&st.pool, owner, repo, pr_number)
        .await
        .map_err(|e| e.to_string())?;
    let Some(run) = run else {
        return Ok(PrOutcome::Ignored("no run found for this PR".to_string()));
    };

    let action = webhook::derive_action(event_type, payload);
    let Some((mapped_event, mapped_payload, kind, value)) = webhook::action_to_event(&action) else {
        return Ok(PrOutcome::Ignored("event does not drive a transition".to_string()));
    };
    let key = webhook::idempotency_key(delivery_id, event_type, pr_number, index, kind, value);

    let mut audit = st.audit.lock().await;
    let result = forgerun_coordinator::apply(&st.pool, &mut audit, &run.run_id, mapped_event, mapped_payload, Some(key)).await;

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            // Only the webhook ingress downgrades an illegal transition to
            // "ignored" (§4.4 step 8); every other caller of
            // `forgerun_coordinator::apply` sees the error as-is.
            return match e.downcast_ref::<forgerun_schemas::CoreError>() {
                Some(core_err) if !core_err.is_retryable_dispatch_failure() => {
                    Ok(PrOutcome::Ignored(format!("illegal transition: {core_err}")))
                }
                _ => Err(e.to_string()),
            };
        }
    };

    Ok(PrOutcome::Processed {
        from_state: result.from_state.as_str().to_string(),
        to_state: result.to_state.as_str().to_string(),
    })
}

// ---------------------------------------------------------------------------
// GET /v1/runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ListRunsParams {
    limit: Option<i64>,
}

pub(crate) async fn list_runs(State(st): State<Arc<AppState>>, Query(params): Query<ListRunsParams>) -> Response {
    let limit = params.limit.unwrap_or(50);
    match forgerun_store::list_runs(&st.pool, limit).await {
        Ok(rows) => {
            let runs = rows
                .into_iter()
                .map(|r| RunSummary {
                    run_id: r.run_id,
                    owner: r.owner,
                    repo: r.repo,
                    pr_number: r.pr_number,
                    state: r.state.as_str().to_string(),
                })
                .collect();
            (StatusCode::OK, Json(ListRunsResponse { runs })).into_response()
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, format!("storage error: {e}")),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/events (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    info!("client subscribed to /v1/events");
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::RunTransition { .. } => "run_transition",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
