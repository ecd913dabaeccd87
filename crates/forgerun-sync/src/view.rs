//! Wire-level pull-request view returned by the hosting service.
//!
//! Mirrors the GitHub GraphQL PR shape closely enough to decode it directly;
//! unknown fields are ignored (`deny_unknown_fields` is deliberately not set)
//! so additions to the upstream schema don't break deserialization.

use serde::Deserialize;

/// One `statusCheckRollup` entry: a single check run or status context.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckEntry {
    pub conclusion: Option<String>,
    pub state: Option<String>,
}

/// One entry of the PR's `reviews` list, in the order the hosting service
/// returned them (oldest first, matching the GitHub API's default order).
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewEntry {
    pub state: String,
}

/// The full PR view payload consumed by [`crate::engine::synchronize`].
///
/// Field names are `camelCase` on the wire (`statusCheckRollup`,
/// `reviewDecision`) to decode GitHub's GraphQL PR shape directly, as
/// produced by `forgerun-hosting::fetch_pull_request_view`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrView {
    #[serde(default)]
    pub status_check_rollup: Vec<CheckEntry>,
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub reviews: Vec<ReviewEntry>,
}
