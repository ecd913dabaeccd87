//! Run lifecycle state machine.
//!
//! Explicit state machine for a single run. Every lifecycle event is
//! resolved to a target state by the coordinator's event resolver and
//! applied via [`assert_transition`], which enforces the single invariant
//! that matters here: **illegal transitions are rejected, never silently
//! clamped.**
//!
//! Self-transitions (`src == tgt`) are always legal no-ops.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All states a run can occupy. Closed set; exhaustive dispatch everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Discovery,
    PlanReady,
    Implementing,
    LocalValidating,
    Pushed,
    CiWait,
    ReviewWait,
    Iterating,
    Paused,
    Done,
    Skipped,
    NeedsHumanReview,
    FailedRetryable,
    FailedTerminal,
}

impl RunState {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::FailedTerminal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Discovery => "DISCOVERY",
            Self::PlanReady => "PLAN_READY",
            Self::Implementing => "IMPLEMENTING",
            Self::LocalValidating => "LOCAL_VALIDATING",
            Self::Pushed => "PUSHED",
            Self::CiWait => "CI_WAIT",
            Self::ReviewWait => "REVIEW_WAIT",
            Self::Iterating => "ITERATING",
            Self::Paused => "PAUSED",
            Self::Done => "DONE",
            Self::Skipped => "SKIPPED",
            Self::NeedsHumanReview => "NEEDS_HUMAN_REVIEW",
            Self::FailedRetryable => "FAILED_RETRYABLE",
            Self::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "QUEUED" => Self::Queued,
            "DISCOVERY" => Self::Discovery,
            "PLAN_READY" => Self::PlanReady,
            "IMPLEMENTING" => Self::Implementing,
            "LOCAL_VALIDATING" => Self::LocalValidating,
            "PUSHED" => Self::Pushed,
            "CI_WAIT" => Self::CiWait,
            "REVIEW_WAIT" => Self::ReviewWait,
            "ITERATING" => Self::Iterating,
            "PAUSED" => Self::Paused,
            "DONE" => Self::Done,
            "SKIPPED" => Self::Skipped,
            "NEEDS_HUMAN_REVIEW" => Self::NeedsHumanReview,
            "FAILED_RETRYABLE" => Self::FailedRetryable,
            "FAILED_TERMINAL" => Self::FailedTerminal,
            _ => return None,
        })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn transition_table() -> &'static HashMap<RunState, Vec<RunState>> {
    use RunState::*;
    static TABLE: OnceLock<HashMap<RunState, Vec<RunState>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            (
                Queued,
                vec![Discovery, Paused, Skipped, FailedRetryable, FailedTerminal],
            ),
            (
                Discovery,
                vec![
                    PlanReady,
                    Paused,
                    Skipped,
                    FailedRetryable,
                    FailedTerminal,
                    NeedsHumanReview,
                ],
            ),
            (
                PlanReady,
                vec![Implementing, Paused, Skipped, FailedRetryable, NeedsHumanReview],
            ),
            (
                Implementing,
                vec![
                    LocalValidating,
                    Paused,
                    FailedRetryable,
                    FailedTerminal,
                    NeedsHumanReview,
                ],
            ),
            (
                LocalValidating,
                vec![Pushed, Paused, FailedRetryable, FailedTerminal, NeedsHumanReview],
            ),
            (Pushed, vec![CiWait, Paused, NeedsHumanReview, Done]),
            (
                CiWait,
                vec![
                    ReviewWait,
                    Iterating,
                    Paused,
                    FailedRetryable,
                    FailedTerminal,
                    NeedsHumanReview,
                ],
            ),
            (
                ReviewWait,
                vec![Iterating, Paused, Done, FailedRetryable, NeedsHumanReview],
            ),
            (
                Iterating,
                vec![
                    Implementing,
                    LocalValidating,
                    Paused,
                    FailedRetryable,
                    FailedTerminal,
                    NeedsHumanReview,
                ],
            ),
            (
                Paused,
                vec![
                    Queued,
                    Discovery,
                    PlanReady,
                    Implementing,
                    LocalValidating,
                    Pushed,
                    CiWait,
                    ReviewWait,
                    Iterating,
                    NeedsHumanReview,
                    FailedRetryable,
                    Skipped,
                    FailedTerminal,
                ],
            ),
            (
                NeedsHumanReview,
                vec![
                    Implementing,
                    Iterating,
                    Paused,
                    Skipped,
                    Done,
                    FailedTerminal,
                ],
            ),
            (
                FailedRetryable,
                vec![
                    Discovery,
                    Implementing,
                    LocalValidating,
                    Iterating,
                    NeedsHumanReview,
                    Skipped,
                    FailedTerminal,
                ],
            ),
            (Done, vec![]),
            (Skipped, vec![]),
            (FailedTerminal, vec![]),
        ])
    })
}

/// Returns `true` if `target` is a legal destination from `source`.
pub fn can_transition(source: RunState, target: RunState) -> bool {
    source == target || transition_table()[&source].contains(&target)
}

/// Fails with [`CoreError::IllegalTransition`] if `target` is not legal from
/// `source` and `source != target`. Self-transitions always succeed silently.
pub fn assert_transition(source: RunState, target: RunState) -> Result<(), CoreError> {
    if source == target {
        return Ok(());
    }
    if !can_transition(source, target) {
        return Err(CoreError::IllegalTransition {
            from: source,
            to: target,
        });
    }
    Ok(())
}

/// Legal targets from `state`, in the table's declaration order.
pub fn allowed_targets(state: RunState) -> &'static [RunState] {
    transition_table()[&state].as_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_transition_is_noop() {
        assert!(assert_transition(RunState::CiWait, RunState::CiWait).is_ok());
    }

    #[test]
    fn happy_path_transition_legal() {
        assert!(assert_transition(RunState::Queued, RunState::Discovery).is_ok());
        assert!(assert_transition(RunState::Discovery, RunState::PlanReady).is_ok());
        assert!(assert_transition(RunState::PlanReady, RunState::Implementing).is_ok());
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [RunState::Done, RunState::Skipped, RunState::FailedTerminal] {
            assert!(terminal.is_terminal());
            assert!(allowed_targets(terminal).is_empty());
            let err = assert_transition(terminal, RunState::Queued).unwrap_err();
            assert!(matches!(err, CoreError::IllegalTransition { .. }));
        }
    }

    #[test]
    fn illegal_transition_rejected() {
        let err = assert_transition(RunState::Queued, RunState::Done).unwrap_err();
        match err {
            CoreError::IllegalTransition { from, to } => {
                assert_eq!(from, RunState::Queued);
                assert_eq!(to, RunState::Done);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn paused_can_reach_any_non_terminal_or_skip_fail() {
        assert!(can_transition(RunState::Paused, RunState::Queued));
        assert!(can_transition(RunState::Paused, RunState::FailedRetryable));
        assert!(can_transition(RunState::Paused, RunState::Pushed));
        assert!(can_transition(RunState::Paused, RunState::Skipped));
        assert!(can_transition(RunState::Paused, RunState::FailedTerminal));
        assert!(!can_transition(RunState::Paused, RunState::Done));
    }

    #[test]
    fn state_string_round_trips() {
        for state in [
            RunState::Queued,
            RunState::NeedsHumanReview,
            RunState::FailedRetryable,
        ] {
            let parsed = RunState::parse(state.as_str()).unwrap();
            assert_eq!(parsed, state);
        }
    }
}
