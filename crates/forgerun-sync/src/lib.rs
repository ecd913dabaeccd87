//! External synchronization engine: aggregates a pull request's check runs
//! and review state into the events the coordinator should apply next.
//!
//! Used by both a periodic worker and an on-demand CLI consumer; this crate
//! only decides what to do, it never fetches a PR view or calls the
//! coordinator itself.

mod engine;
mod view;

pub use engine::{decide_check_conclusion, decide_review_state, is_active, synchronize, RunSnapshot, SyncEvent};
pub use view::{CheckEntry, PrView, ReviewEntry};
