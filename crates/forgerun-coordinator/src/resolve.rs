//! Event -> target-state resolver (§4.3). Pure function, no I/O: takes the
//! run's current state, the event type, and its payload, and returns the
//! state the run should move to, or `None` if the event is a no-op in this
//! state.
//!
//! Most events resolve to a fixed target unconditionally; the run lifecycle
//! state machine (`forgerun_schemas::state`) is what actually rejects a
//! resolved target that isn't reachable from the current state. Two events —
//! `command.start.implementation` and `command.local.validation.passed` —
//! are narrower than their transition-table row: the table additionally
//! permits `NEEDS_HUMAN_REVIEW -> IMPLEMENTING` and `FAILED_RETRYABLE ->
//! LOCAL_VALIDATING` (reachable via other events), so those two are
//! explicitly gated here against the current-state set spec.md names rather
//! than left to the table.

use forgerun_schemas::{EventType, RunState};
use serde_json::Value;

/// Resolves `(current, event_type, payload)` to a target state. Returned
/// target is not yet validated against the transition table; the caller
/// (`forgerun_store::apply_event`) runs it through `assert_transition`.
pub fn resolve_target(current: RunState, event_type: EventType, payload: &Value) -> Option<RunState> {
    use EventType::*;
    match event_type {
        CommandRunCreate => None,
        CommandStartDiscovery => Some(RunState::Discovery),
        WorkerDiscoveryCompleted => Some(RunState::PlanReady),
        CommandStartImplementation => resolve_start_implementation(current),
        CommandLocalValidationPassed => resolve_local_validation_passed(current),
        WorkerPushCompleted => Some(RunState::Pushed),
        CommandPrLinked => Some(RunState::CiWait),
        WorkerStepFailed => Some(RunState::FailedRetryable),
        GithubCheckCompleted => Some(resolve_check_completed(payload)),
        GithubReviewSubmitted => resolve_review_submitted(payload),
        CommandMarkDone => Some(RunState::Done),
        CommandPause => Some(RunState::Paused),
        CommandResume | CommandRetry => resolve_explicit_target_state(payload),
        TimerTimeout => Some(RunState::FailedRetryable),
    }
}

/// `command.start.implementation` only acts from `{PLAN_READY, ITERATING,
/// PAUSED}`; elsewhere it's a no-op (spec.md:100).
fn resolve_start_implementation(current: RunState) -> Option<RunState> {
    match current {
        RunState::PlanReady | RunState::Iterating | RunState::Paused => Some(RunState::Implementing),
        _ => None,
    }
}

/// `command.local.validation.passed` only acts from `{IMPLEMENTING,
/// ITERATING, PAUSED}`; elsewhere it's a no-op (spec.md:101).
fn resolve_local_validation_passed(current: RunState) -> Option<RunState> {
    match current {
        RunState::Implementing | RunState::Iterating | RunState::Paused => Some(RunState::LocalValidating),
        _ => None,
    }
}

fn resolve_check_completed(payload: &Value) -> RunState {
    let conclusion = payload.get("conclusion").and_then(Value::as_str).unwrap_or("");
    match conclusion {
        "success" | "neutral" | "skipped" => RunState::ReviewWait,
        _ => RunState::Iterating,
    }
}

fn resolve_review_submitted(payload: &Value) -> Option<RunState> {
    let state = payload.get("state").and_then(Value::as_str).unwrap_or("");
    if state == "changes_requested" {
        Some(RunState::Iterating)
    } else {
        None
    }
}

/// `command.resume` / `command.retry` carry their destination explicitly;
/// a missing or unparseable `target_state` resolves to no target, which the
/// caller treats as an illegal transition since both events are mandatory.
fn resolve_explicit_target_state(payload: &Value) -> Option<RunState> {
    let raw = payload.get("target_state").and_then(Value::as_str)?;
    RunState::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_discovery_always_targets_discovery() {
        assert_eq!(
            resolve_target(RunState::Queued, EventType::CommandStartDiscovery, &json!({})),
            Some(RunState::Discovery)
        );
    }

    #[test]
    fn start_implementation_only_acts_from_gated_states() {
        for ok in [RunState::PlanReady, RunState::Iterating, RunState::Paused] {
            assert_eq!(
                resolve_target(ok, EventType::CommandStartImplementation, &json!({})),
                Some(RunState::Implementing)
            );
        }
        assert_eq!(
            resolve_target(RunState::NeedsHumanReview, EventType::CommandStartImplementation, &json!({})),
            None
        );
    }

    #[test]
    fn local_validation_passed_only_acts_from_gated_states() {
        for ok in [RunState::Implementing, RunState::Iterating, RunState::Paused] {
            assert_eq!(
                resolve_target(ok, EventType::CommandLocalValidationPassed, &json!({})),
                Some(RunState::LocalValidating)
            );
        }
        assert_eq!(
            resolve_target(RunState::FailedRetryable, EventType::CommandLocalValidationPassed, &json!({})),
            None
        );
    }

    #[test]
    fn check_completed_maps_conclusion_to_review_or_iterating() {
        assert_eq!(
            resolve_target(
                RunState::CiWait,
                EventType::GithubCheckCompleted,
                &json!({"conclusion": "success"})
            ),
            Some(RunState::ReviewWait)
        );
        assert_eq!(
            resolve_target(
                RunState::CiWait,
                EventType::GithubCheckCompleted,
                &json!({"conclusion": "failure"})
            ),
            Some(RunState::Iterating)
        );
    }

    #[test]
    fn review_submitted_only_acts_on_changes_requested() {
        assert_eq!(
            resolve_target(
                RunState::ReviewWait,
                EventType::GithubReviewSubmitted,
                &json!({"state": "changes_requested"})
            ),
            Some(RunState::Iterating)
        );
        assert_eq!(
            resolve_target(
                RunState::ReviewWait,
                EventType::GithubReviewSubmitted,
                &json!({"state": "approved"})
            ),
            None
        );
    }

    #[test]
    fn resume_and_retry_use_explicit_target_state() {
        assert_eq!(
            resolve_target(
                RunState::Paused,
                EventType::CommandResume,
                &json!({"target_state": "IMPLEMENTING"})
            ),
            Some(RunState::Implementing)
        );
        assert_eq!(
            resolve_target(RunState::Paused, EventType::CommandRetry, &json!({})),
            None
        );
    }

    #[test]
    fn run_create_never_resolves() {
        assert_eq!(
            resolve_target(RunState::Queued, EventType::CommandRunCreate, &json!({})),
            None
        );
    }
}
