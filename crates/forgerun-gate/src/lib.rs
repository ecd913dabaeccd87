//! PR gate / readiness evaluator (§4.7): decides whether a run's latest
//! runtime classification, preflight result, diff size, and declared skill
//! plan clear the policy bar for merge.

mod evaluator;
mod types;

pub use evaluator::evaluate_pr_gate_readiness;
pub use types::{CheckItem, GateReadiness, ACCEPTED_PASS_REASON_CODES};
