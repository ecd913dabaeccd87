//! Run coordination: the pure event resolver (§4.3), the runtime evidence
//! classifier (§4.6), and the glue that ties resolver + storage + audit
//! sink together into `apply(event)` (§4.2).

mod apply;
mod classifier;
mod resolve;

pub use apply::{apply, ApplyResult};
pub use classifier::{
    apply_semantic_override, classify_agent_runtime, AgentProcessResult, ClassifyInput, Classification,
    DiffSummary, PreflightReport, TestInfraSignals,
};
pub use resolve::resolve_target;
