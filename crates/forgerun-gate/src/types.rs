use serde::{Deserialize, Serialize};

/// The stable set of reason codes accepted as a PASS for gate purposes
/// (§4.7). Anything else, even grade PASS, fails `runtime_not_runtime_success`.
pub const ACCEPTED_PASS_REASON_CODES: &[&str] = &[
    "runtime_success",
    "runtime_success_allowlisted_test_failures",
    "runtime_success_recovered_test_failures",
    "runtime_success_no_test_infra_with_validation",
];

/// One failed check or warning: a stable code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckItem {
    pub code: String,
    pub message: String,
}

impl CheckItem {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// PR gate readiness verdict (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReadiness {
    pub ok: bool,
    pub failed_checks: Vec<CheckItem>,
    pub warnings: Vec<CheckItem>,
}

impl GateReadiness {
    pub fn ok(warnings: Vec<CheckItem>) -> Self {
        Self {
            ok: true,
            failed_checks: Vec::new(),
            warnings,
        }
    }

    pub fn failed(failed_checks: Vec<CheckItem>, warnings: Vec<CheckItem>) -> Self {
        Self {
            ok: failed_checks.is_empty(),
            failed_checks,
            warnings,
        }
    }
}
