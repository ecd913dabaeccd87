//! Shared data model, state machine, error taxonomy, clocks, and
//! idempotency-key helpers used by every other core crate.

pub mod clock;
pub mod error;
pub mod idempotency;
pub mod model;
pub mod state;

pub use clock::{Clock, IdGen, SystemClock, UuidRunIdGen};
pub use error::CoreError;
pub use model::{
    Artifact, ArtifactKind, Event, EventInput, EventType, Grade, NextAction, Run, RunCreateInput,
    RunMode, StepAttempt, StepName, WebhookDelivery,
};
pub use state::{allowed_targets, assert_transition, can_transition, RunState};
