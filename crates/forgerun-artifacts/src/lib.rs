//! Typed artifact-pointer builders (§3: "Artifact — a typed pointer to an
//! out-of-band payload (URI + small metadata)") and the read-only `RunDigest`
//! projection the PR gate consumes (§6: "the PR gate's digest is a read-only
//! projection").

use chrono::{DateTime, Utc};
use forgerun_schemas::ArtifactKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What the coordinator needs to persist an artifact row: the kind, a URI
/// pointing at the out-of-band payload, and small inline metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPointer {
    pub kind: ArtifactKind,
    pub uri: String,
    pub metadata: Value,
}

/// `worker.discovery.completed{contract_path}` → PLAN_READY (§4.2 step 5).
pub fn contract_artifact(contract_path: &str) -> ArtifactPointer {
    ArtifactPointer {
        kind: ArtifactKind::Contract,
        uri: contract_path.to_string(),
        metadata: json!({}),
    }
}

/// `worker.push.completed{branch}` → PUSHED (§4.2 step 5).
pub fn branch_artifact(branch: &str) -> ArtifactPointer {
    ArtifactPointer {
        kind: ArtifactKind::Branch,
        uri: format!("branch://{branch}"),
        metadata: json!({ "branch": branch }),
    }
}

/// Raw agent-process evidence, stored verbatim alongside the classification
/// that was derived from it.
pub fn agent_runtime_report_artifact(
    uri: &str,
    exit_code: i32,
    duration_ms: i64,
) -> ArtifactPointer {
    ArtifactPointer {
        kind: ArtifactKind::AgentRuntimeReport,
        uri: uri.to_string(),
        metadata: json!({ "exit_code": exit_code, "duration_ms": duration_ms }),
    }
}

/// One preflight run's pass/fail summary.
pub fn preflight_report_artifact(uri: &str, ok: bool, failure_count: usize) -> ArtifactPointer {
    ArtifactPointer {
        kind: ArtifactKind::PreflightReport,
        uri: uri.to_string(),
        metadata: json!({ "ok": ok, "failure_count": failure_count }),
    }
}

/// `run_digest` — the compact, gate-facing summary of the latest runtime
/// classification. One of these is stored per classification event; the PR
/// gate reads only the most recent one for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDigest {
    pub grade: String,
    pub reason_code: String,
    pub attempt_no: u32,
    pub changed_files: u32,
    pub added_lines: u32,
    pub observed_test_commands: u32,
    pub failed_test_commands: u32,
    pub safety_violation_count: u32,
    pub preflight_ok: bool,
    pub skills_mode: String,
    #[serde(default)]
    pub missing_required_skills: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub fn run_digest_artifact(digest: &RunDigest) -> ArtifactPointer {
    ArtifactPointer {
        kind: ArtifactKind::RunDigest,
        uri: format!("digest://{}/{}", digest.reason_code, digest.attempt_no),
        metadata: serde_json::to_value(digest).expect("RunDigest always serializes"),
    }
}
