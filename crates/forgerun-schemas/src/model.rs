//! Shared data model (SPEC_FULL.md §3): Run, Event, StepAttempt, Artifact,
//! WebhookDelivery, and the closed enums they're built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::RunState;

/// Closed set of event types the coordinator accepts (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandRunCreate,
    CommandStartDiscovery,
    CommandStartImplementation,
    CommandLocalValidationPassed,
    CommandPrLinked,
    CommandMarkDone,
    CommandRetry,
    CommandPause,
    CommandResume,
    WorkerDiscoveryCompleted,
    WorkerStepFailed,
    WorkerPushCompleted,
    GithubCheckCompleted,
    GithubReviewSubmitted,
    TimerTimeout,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandRunCreate => "command.run.create",
            Self::CommandStartDiscovery => "command.start.discovery",
            Self::CommandStartImplementation => "command.start.implementation",
            Self::CommandLocalValidationPassed => "command.local.validation.passed",
            Self::CommandPrLinked => "command.pr.linked",
            Self::CommandMarkDone => "command.mark.done",
            Self::CommandRetry => "command.retry",
            Self::CommandPause => "command.pause",
            Self::CommandResume => "command.resume",
            Self::WorkerDiscoveryCompleted => "worker.discovery.completed",
            Self::WorkerStepFailed => "worker.step.failed",
            Self::WorkerPushCompleted => "worker.push.completed",
            Self::GithubCheckCompleted => "github.check.completed",
            Self::GithubReviewSubmitted => "github.review.submitted",
            Self::TimerTimeout => "timer.timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "command.run.create" => Self::CommandRunCreate,
            "command.start.discovery" => Self::CommandStartDiscovery,
            "command.start.implementation" => Self::CommandStartImplementation,
            "command.local.validation.passed" => Self::CommandLocalValidationPassed,
            "command.pr.linked" => Self::CommandPrLinked,
            "command.mark.done" => Self::CommandMarkDone,
            "command.retry" => Self::CommandRetry,
            "command.pause" => Self::CommandPause,
            "command.resume" => Self::CommandResume,
            "worker.discovery.completed" => Self::WorkerDiscoveryCompleted,
            "worker.step.failed" => Self::WorkerStepFailed,
            "worker.push.completed" => Self::WorkerPushCompleted,
            "github.check.completed" => Self::GithubCheckCompleted,
            "github.review.submitted" => Self::GithubReviewSubmitted,
            "timer.timeout" => Self::TimerTimeout,
            _ => return None,
        })
    }

    /// Event types for which a missing resolver target is an error, not a
    /// silent no-op (§4.2). `command.run.create` never goes through the
    /// resolver at all, and `github.review.submitted` explicitly no-ops
    /// when the review state isn't `changes_requested`.
    pub fn is_mandatory_transition(&self) -> bool {
        !matches!(self, Self::CommandRunCreate | Self::GithubReviewSubmitted)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run mode. Closed to a single value today; kept as an enum per §3 so a
/// future mode is a non-breaking addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    PushOnly,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::PushOnly
    }
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PushOnly => "push-only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "push-only" => Some(Self::PushOnly),
            _ => None,
        }
    }
}

/// The unit of work (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    pub prompt_version: String,
    pub mode: RunMode,
    pub budget: Value,
    pub workspace_dir: String,
    pub pr_number: Option<i64>,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `createRun` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreateInput {
    pub owner: String,
    pub repo: String,
    pub prompt_version: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub budget: Value,
    pub run_id: Option<String>,
    pub workspace_dir: Option<String>,
}

/// An immutable record of something that happened to a run (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub run_id: String,
    pub event_type: EventType,
    pub idempotency_key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// The input to `applyEvent` before it has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub run_id: String,
    pub event_type: EventType,
    pub payload: Value,
    pub idempotency_key: String,
}

/// External process invocation bookkeeping (§3). Append-only; does not drive
/// transitions directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Prepare,
    Finish,
    Agent,
    Preflight,
    GithubSync,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Finish => "finish",
            Self::Agent => "agent",
            Self::Preflight => "preflight",
            Self::GithubSync => "github_sync",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAttempt {
    pub run_id: String,
    pub step: StepName,
    pub attempt_no: i64,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A typed pointer to an out-of-band payload (§3). Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Contract,
    Branch,
    AgentRuntimeReport,
    RunDigest,
    PreflightReport,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Branch => "branch",
            Self::AgentRuntimeReport => "agent_runtime_report",
            Self::RunDigest => "run_digest",
            Self::PreflightReport => "preflight_report",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub run_id: String,
    pub kind: ArtifactKind,
    pub uri: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// `(source, delivery_id)` unique; used exclusively for replay defense (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub source: String,
    pub delivery_id: String,
    pub event_type: String,
    pub payload_sha256: String,
    pub received_at: DateTime<Utc>,
}

/// Runtime evidence classifier output grade (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Pass,
    Retryable,
    HumanReview,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Retryable => "RETRYABLE",
            Self::HumanReview => "HUMAN_REVIEW",
        }
    }
}

/// Next action a classification implies (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Advance,
    Retry,
    Escalate,
}
