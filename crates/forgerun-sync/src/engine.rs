//! External synchronization engine. Pure, deterministic logic: no IO, no
//! hosting-service calls. The caller fetches the PR view and hands it here;
//! this module decides what events (if any) the coordinator should apply.

use forgerun_schemas::{EventType, RunState};
use serde_json::{json, Value};

use crate::view::PrView;

/// Which bucket a single `statusCheckRollup` entry falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckBucket {
    Failure,
    Success,
    Pending,
    Unknown,
}

const FAILURE_CONCLUSIONS: &[&str] = &[
    "failure",
    "timed_out",
    "cancelled",
    "action_required",
    "startup_failure",
    "stale",
];
const FAILURE_STATES: &[&str] = &["failure", "error"];
const SUCCESS_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];
const PENDING_STATES: &[&str] = &["queued", "in_progress", "pending", "waiting", "requested"];

const REVIEW_STATE_PRIORITY: &[&str] = &["changes_requested", "approved", "commented", "dismissed"];

fn bucket(entry: &crate::view::CheckEntry) -> CheckBucket {
    let conclusion = entry.conclusion.as_deref().unwrap_or("");
    let state = entry.state.as_deref().unwrap_or("");

    if FAILURE_CONCLUSIONS.contains(&conclusion) || FAILURE_STATES.contains(&state) {
        CheckBucket::Failure
    } else if SUCCESS_CONCLUSIONS.contains(&conclusion) {
        CheckBucket::Success
    } else if PENDING_STATES.contains(&state) {
        CheckBucket::Pending
    } else {
        CheckBucket::Unknown
    }
}

/// Decide the aggregate check conclusion for a PR's status check rollup.
///
/// Returns `None` when the decision should be deferred: any check still
/// pending, or no entries to decide from at all.
pub fn decide_check_conclusion(rollup: &[crate::view::CheckEntry]) -> Option<&'static str> {
    let mut failures = 0;
    let mut pending = 0;
    let mut decided = 0;

    for entry in rollup {
        match bucket(entry) {
            CheckBucket::Failure => failures += 1,
            CheckBucket::Pending => pending += 1,
            CheckBucket::Success | CheckBucket::Unknown => decided += 1,
        }
    }

    if failures > 0 {
        Some("failure")
    } else if pending > 0 {
        None
    } else if decided >= 1 {
        Some("success")
    } else {
        None
    }
}

/// Decide the PR's current review state.
///
/// `reviewDecision == changes_requested` wins outright; otherwise the most
/// recent review (newest first) whose state is one of the four tracked
/// states decides. `reviews` is assumed oldest-first, matching the hosting
/// service's default order.
pub fn decide_review_state(pr_view: &PrView) -> Option<&'static str> {
    if pr_view.review_decision.as_deref() == Some("changes_requested") {
        return Some("changes_requested");
    }

    pr_view
        .reviews
        .iter()
        .rev()
        .find_map(|r| REVIEW_STATE_PRIORITY.iter().find(|s| **s == r.state).copied())
}

/// A minimal view of an active run: just enough to decide whether it's a
/// synchronization candidate and to address the events it produces.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub state: RunState,
    pub pr_number: Option<i64>,
}

/// `true` for runs the periodic worker / on-demand CLI should poll.
pub fn is_active(run: &RunSnapshot) -> bool {
    matches!(run.state, RunState::CiWait | RunState::ReviewWait | RunState::Iterating) && run.pr_number.is_some()
}

/// One event the caller should feed to `forgerun_coordinator::apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub run_id: String,
    pub event_type: EventType,
    pub payload: Value,
}

/// Decide what events (if any) this run's synchronization tick produces.
///
/// Inactive runs (wrong state, or no linked PR) always produce no events.
pub fn synchronize(run: &RunSnapshot, pr_view: &PrView) -> Vec<SyncEvent> {
    if !is_active(run) {
        return Vec::new();
    }

    let mut events = Vec::new();

    if let Some(conclusion) = decide_check_conclusion(&pr_view.status_check_rollup) {
        events.push(SyncEvent {
            run_id: run.run_id.clone(),
            event_type: EventType::GithubCheckCompleted,
            payload: json!({ "conclusion": conclusion }),
        });
    }

    if decide_review_state(pr_view) == Some("changes_requested") {
        events.push(SyncEvent {
            run_id: run.run_id.clone(),
            event_type: EventType::GithubReviewSubmitted,
            payload: json!({ "state": "changes_requested" }),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{CheckEntry, ReviewEntry};

    fn entry(conclusion: Option<&str>, state: Option<&str>) -> CheckEntry {
        CheckEntry {
            conclusion: conclusion.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn any_failure_wins_outright() {
        let rollup = vec![
            entry(Some("success"), None),
            entry(Some("timed_out"), None),
            entry(None, Some("queued")),
        ];
        assert_eq!(decide_check_conclusion(&rollup), Some("failure"));
    }

    #[test]
    fn pending_defers_when_no_failures() {
        let rollup = vec![entry(Some("success"), None), entry(None, Some("in_progress"))];
        assert_eq!(decide_check_conclusion(&rollup), None);
    }

    #[test]
    fn all_success_or_unknown_decides_success() {
        let rollup = vec![entry(Some("success"), None), entry(Some("weird"), Some("weird"))];
        assert_eq!(decide_check_conclusion(&rollup), Some("success"));
    }

    #[test]
    fn empty_rollup_defers() {
        assert_eq!(decide_check_conclusion(&[]), None);
    }

    #[test]
    fn review_decision_changes_requested_wins_over_reviews() {
        let pr = PrView {
            status_check_rollup: vec![],
            review_decision: Some("changes_requested".to_string()),
            reviews: vec![ReviewEntry {
                state: "approved".to_string(),
            }],
        };
        assert_eq!(decide_review_state(&pr), Some("changes_requested"));
    }

    #[test]
    fn falls_back_to_newest_tracked_review_state() {
        let pr = PrView {
            status_check_rollup: vec![],
            review_decision: None,
            reviews: vec![
                ReviewEntry {
                    state: "changes_requested".to_string(),
                },
                ReviewEntry {
                    state: "commented".to_string(),
                },
            ],
        };
        assert_eq!(decide_review_state(&pr), Some("commented"));
    }

    #[test]
    fn untracked_review_states_are_skipped() {
        let pr = PrView {
            status_check_rollup: vec![],
            review_decision: None,
            reviews: vec![ReviewEntry {
                state: "pending".to_string(),
            }],
        };
        assert_eq!(decide_review_state(&pr), None);
    }

    #[test]
    fn inactive_run_produces_no_events() {
        let run = RunSnapshot {
            run_id: "run_1".to_string(),
            state: RunState::Implementing,
            pr_number: Some(7),
        };
        let pr = PrView {
            status_check_rollup: vec![entry(Some("success"), None)],
            review_decision: None,
            reviews: vec![],
        };
        assert!(synchronize(&run, &pr).is_empty());
    }

    #[test]
    fn run_without_pr_number_is_not_active() {
        let run = RunSnapshot {
            run_id: "run_1".to_string(),
            state: RunState::CiWait,
            pr_number: None,
        };
        assert!(!is_active(&run));
    }

    #[test]
    fn active_run_emits_both_events_when_warranted() {
        let run = RunSnapshot {
            run_id: "run_1".to_string(),
            state: RunState::CiWait,
            pr_number: Some(42),
        };
        let pr = PrView {
            status_check_rollup: vec![entry(Some("success"), None)],
            review_decision: Some("changes_requested".to_string()),
            reviews: vec![],
        };
        let events = synchronize(&run, &pr);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::GithubCheckCompleted);
        assert_eq!(events[0].payload, json!({ "conclusion": "success" }));
        assert_eq!(events[1].event_type, EventType::GithubReviewSubmitted);
        assert_eq!(events[1].payload, json!({ "state": "changes_requested" }));
    }

    #[test]
    fn non_changes_requested_review_state_drives_no_event() {
        let run = RunSnapshot {
            run_id: "run_1".to_string(),
            state: RunState::ReviewWait,
            pr_number: Some(42),
        };
        let pr = PrView {
            status_check_rollup: vec![],
            review_decision: None,
            reviews: vec![ReviewEntry {
                state: "approved".to_string(),
            }],
        };
        assert!(synchronize(&run, &pr).is_empty());
    }
}
