//! Runtime evidence classifier (§4.6). Pure function: grades one agent
//! process result against the policy block and hands back a classification
//! the coordinator turns into a `run_digest` artifact.

use forgerun_schemas::{Grade, NextAction, RunState};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

const TEST_COMMAND_PATTERNS: &[&str] = &[
    r"(?i)\bpytest\b",
    r"(?i)\btox\b",
    r"(?i)\bmake\s+test\b",
    r"(?i)\bbun\s+test\b",
    r"(?i)\bnpm\s+test\b",
    r"(?i)\bpnpm\s+test\b",
    r"(?i)\byarn\s+test\b",
    r"(?i)\bhatch\s+run\s+.*\btest\b",
];

const LINT_PATTERNS: &[&str] = &[
    r"(?i)\bmake\s+lint\b",
    r"(?i)\bruff\b",
    r"(?i)\beslint\b",
    r"(?i)\bflake8\b",
    r"(?i)\bmypy\b",
    r"(?i)\bpyright\b",
    r"(?i)\btypecheck\b",
    r"(?i)\bpre-commit\b",
];

const HARD_FAILURE_PATTERNS: &[&str] = &[
    r"(?i)\bpermission denied\b",
    r"(?i)\boperation not permitted\b",
    r"(?i)\bread-only file system\b",
    r"(?i)\bauthentication failed\b",
    r"(?i)\bunauthorized\b",
    r"(?i)\bforbidden\b",
    r"(?i)\bnot a git repository\b",
    r"(?i)\brepository not found\b",
    r"(?i)\bcommand not found\b",
    r"(?i)\bno such file or directory\b",
    r"(?i)\bindex\.lock\b",
];

const RETRYABLE_FAILURE_PATTERNS: &[&str] = &[
    r"(?i)\btimed out\b",
    r"(?i)\btimeout\b",
    r"(?i)\btemporary failure\b",
    r"(?i)\btemporarily unavailable\b",
    r"(?i)\bconnection reset\b",
    r"(?i)\bconnection aborted\b",
    r"(?i)\bconnection refused\b",
    r"(?i)\bcould not resolve host\b",
    r"(?i)\bnetwork is unreachable\b",
    r"(?i)\brate limit\b",
    r"(?i)\btoo many requests\b",
    r"(?i)\bhttp 429\b",
    r"(?i)\bhttp 5\d\d\b",
    r"(?i)\bservice unavailable\b",
];

const SAFETY_PATTERNS: &[(&str, &str)] = &[
    ("sudo", r"(?i)\bsudo\b"),
    ("brew_install", r"(?i)\bbrew\s+install\b"),
    ("npm_global", r"(?i)\bnpm\b.*\s(-g|--global)\b"),
    ("pnpm_global", r"(?i)\bpnpm\b.*\s(-g|--global)\b"),
    ("yarn_global", r"(?i)\byarn\s+global\b"),
    ("uv_tool_install", r"(?i)\buv\s+tool\s+install\b"),
    ("poetry_self", r"(?i)\bpoetry\s+self\b"),
];

const GIT_PUSH_PATTERNS: &[&str] = &[r"(?i)\bgit\s+commit\b", r"(?i)\bgit\s+push\b", r"(?i)\bfinish\.sh\b"];

fn set_of(patterns: &[&str]) -> &'static RegexSet {
    RegexSet::new(patterns).expect("pattern set compiles")
}

macro_rules! cached_set {
    ($name:ident, $patterns:expr) => {
        fn $name() -> &'static RegexSet {
            static SET: OnceLock<RegexSet> = OnceLock::new();
            SET.get_or_init(|| set_of($patterns))
        }
    };
}

cached_set!(test_command_set, TEST_COMMAND_PATTERNS);
cached_set!(lint_set, LINT_PATTERNS);
cached_set!(hard_failure_set, HARD_FAILURE_PATTERNS);
cached_set!(retryable_failure_set, RETRYABLE_FAILURE_PATTERNS);
cached_set!(git_push_set, GIT_PUSH_PATTERNS);

fn contains_any(text: &str, set: &RegexSet) -> bool {
    set.is_match(text)
}

/// Detects which of `commands` match any pattern in `set`, preserving order
/// and de-duplicating.
fn detect_commands(commands: &[String], set: &RegexSet) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for c in commands {
        if contains_any(c, set) && seen.insert(c.clone()) {
            out.push(c.clone());
        }
    }
    out
}

/// Captured process result for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

/// Diff stats observed between the run's base and head commit.
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    pub changed_files_count: u32,
    pub added_lines: u32,
}

/// A preflight pass/fail report, if one ran before the agent.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub ok: bool,
    pub failures: Vec<String>,
}

/// Whether the target repo has any detectable test infrastructure (§4.6
/// semantic override precondition).
#[derive(Debug, Clone, Default)]
pub struct TestInfraSignals {
    pub has_test_directory: bool,
    pub has_test_files: bool,
    pub has_test_dependencies: bool,
    pub has_test_ci_workflow: bool,
}

impl TestInfraSignals {
    fn any(&self) -> bool {
        self.has_test_directory || self.has_test_files || self.has_test_dependencies || self.has_test_ci_workflow
    }
}

/// Everything the classifier needs in one call (§4.6 input contract).
pub struct ClassifyInput<'a> {
    pub run_state: RunState,
    pub result: &'a AgentProcessResult,
    pub preflight_report: Option<&'a PreflightReport>,
    pub commands: &'a [String],
    pub diff_summary: &'a DiffSummary,
    pub allow_agent_push: bool,
    pub max_changed_files: u32,
    pub max_added_lines: u32,
    pub max_retryable_attempts: u32,
    pub min_test_commands: u32,
    pub test_failure_allowlist: &'a [String],
    /// Test commands observed to have failed mid-run (exit code != 0),
    /// extracted from the agent's command-event stream upstream of the
    /// classifier. May still clear via the allowlist or converge by the
    /// final exit code.
    pub failed_test_commands: &'a [String],
    pub attempt_no: u32,
    pub grading_mode: forgerun_config::GradingMode,
    pub test_infra: &'a TestInfraSignals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub grade: Grade,
    pub reason_code: String,
    pub next_action: NextAction,
    pub evidence: Value,
}

/// States the classifier treats as requiring test evidence before a PASS.
fn requires_test_evidence(state: RunState) -> bool {
    matches!(state, RunState::Implementing | RunState::Iterating)
}

fn apply_retryable_cap(mut c: Classification, attempt_no: u32, max_retryable_attempts: u32) -> Classification {
    if c.grade != Grade::Retryable || max_retryable_attempts == 0 || attempt_no <= max_retryable_attempts {
        return c;
    }
    let mut evidence = c.evidence.as_object().cloned().unwrap_or_default();
    evidence.insert("attempt_no".into(), json!(attempt_no));
    evidence.insert("max_retryable_attempts".into(), json!(max_retryable_attempts));
    evidence.insert("original_reason_code".into(), json!(c.reason_code));
    c.grade = Grade::HumanReview;
    c.reason_code = "retryable_limit_exceeded".to_string();
    c.next_action = NextAction::Escalate;
    c.evidence = Value::Object(evidence);
    c
}

fn match_allowlisted_failures(text: &str, patterns: &[String]) -> Vec<String> {
    let mut matched = Vec::new();
    for p in patterns {
        let hit = regex::Regex::new(&format!("(?i){p}"))
            .map(|re| re.is_match(text))
            .unwrap_or_else(|_| text.to_lowercase().contains(&p.to_lowercase()));
        if hit {
            matched.push(p.clone());
        }
    }
    matched
}

/// Step 1-6 of §4.6's decision order. Does not apply the semantic override;
/// call [`apply_semantic_override`] afterward when the grading mode allows it.
pub fn classify_agent_runtime(input: &ClassifyInput<'_>) -> Classification {
    if let Some(preflight) = input.preflight_report {
        if !preflight.ok {
            let failure_text = preflight.failures.join("\n");
            if contains_any(&failure_text, retryable_failure_set()) {
                return apply_retryable_cap(
                    Classification {
                        grade: Grade::Retryable,
                        reason_code: "preflight_transient_failure".to_string(),
                        next_action: NextAction::Retry,
                        evidence: json!({ "failures": preflight.failures }),
                    },
                    input.attempt_no,
                    input.max_retryable_attempts,
                );
            }
            return Classification {
                grade: Grade::HumanReview,
                reason_code: "preflight_hard_failure".to_string(),
                next_action: NextAction::Escalate,
                evidence: json!({ "failures": preflight.failures }),
            };
        }
    }

    let safety_violations: Vec<Value> = input
        .commands
        .iter()
        .flat_map(|command| {
            SAFETY_PATTERNS.iter().filter_map(move |(tag, pattern)| {
                regex::Regex::new(pattern)
                    .ok()
                    .filter(|re| re.is_match(command))
                    .map(|_| json!({ "rule": tag, "command": command }))
            })
        })
        .collect();
    if !safety_violations.is_empty() {
        return Classification {
            grade: Grade::HumanReview,
            reason_code: "safety_violation".to_string(),
            next_action: NextAction::Escalate,
            evidence: json!({ "violations": safety_violations }),
        };
    }

    let git_signals = detect_commands(input.commands, git_push_set());
    if !input.allow_agent_push && !git_signals.is_empty() {
        return Classification {
            grade: Grade::HumanReview,
            reason_code: "agent_push_disallowed".to_string(),
            next_action: NextAction::Escalate,
            evidence: json!({ "git_commands": git_signals }),
        };
    }

    let test_signals = detect_commands(input.commands, test_command_set());
    let lint_signals = detect_commands(input.commands, lint_set());

    if input.result.exit_code == 0 {
        return classify_success(input, &test_signals, &lint_signals);
    }

    let error_text = format!("{}\n{}", input.result.stderr, input.result.stdout);
    if contains_any(&error_text, hard_failure_set()) {
        return Classification {
            grade: Grade::HumanReview,
            reason_code: "runtime_hard_failure".to_string(),
            next_action: NextAction::Escalate,
            evidence: json!({ "exit_code": input.result.exit_code }),
        };
    }
    if contains_any(&error_text, retryable_failure_set()) {
        return apply_retryable_cap(
            Classification {
                grade: Grade::Retryable,
                reason_code: "runtime_transient_failure".to_string(),
                next_action: NextAction::Retry,
                evidence: json!({ "exit_code": input.result.exit_code }),
            },
            input.attempt_no,
            input.max_retryable_attempts,
        );
    }
    apply_retryable_cap(
        Classification {
            grade: Grade::Retryable,
            reason_code: "runtime_unknown_failure".to_string(),
            next_action: NextAction::Retry,
            evidence: json!({ "exit_code": input.result.exit_code }),
        },
        input.attempt_no,
        input.max_retryable_attempts,
    )
}

fn classify_success(input: &ClassifyInput<'_>, test_signals: &[String], lint_signals: &[String]) -> Classification {
    let _ = lint_signals;
    let haystack = format!("{}\n{}", input.result.stderr, input.result.stdout);
    let allowlisted_matches = if input.failed_test_commands.is_empty() {
        Vec::new()
    } else {
        match_allowlisted_failures(&haystack, input.test_failure_allowlist)
    };
    // Allowlisted failures clear entirely; otherwise a non-empty set of
    // mid-run failures alongside a clean final exit code counts as recovery.
    let recovered = !input.failed_test_commands.is_empty() && allowlisted_matches.is_empty();

    let required_tests = if requires_test_evidence(input.run_state) {
        input.min_test_commands
    } else {
        0
    };
    let observed_tests = test_signals.len() as u32;
    if required_tests > 0 && observed_tests < required_tests {
        let reason_code = if observed_tests == 0 && required_tests == 1 {
            "missing_test_evidence"
        } else {
            "insufficient_test_evidence"
        };
        return Classification {
            grade: Grade::HumanReview,
            reason_code: reason_code.to_string(),
            next_action: NextAction::Escalate,
            evidence: json!({
                "expected_state": input.run_state.as_str(),
                "required_test_commands": required_tests,
                "observed_test_commands": observed_tests,
            }),
        };
    }

    if (input.max_changed_files > 0 && input.diff_summary.changed_files_count > input.max_changed_files)
        || (input.max_added_lines > 0 && input.diff_summary.added_lines > input.max_added_lines)
    {
        return Classification {
            grade: Grade::HumanReview,
            reason_code: "diff_budget_exceeded".to_string(),
            next_action: NextAction::Escalate,
            evidence: json!({
                "changed_files_count": input.diff_summary.changed_files_count,
                "added_lines": input.diff_summary.added_lines,
                "max_changed_files": input.max_changed_files,
                "max_added_lines": input.max_added_lines,
            }),
        };
    }

    let reason_code = if !allowlisted_matches.is_empty() {
        "runtime_success_allowlisted_test_failures"
    } else if recovered {
        "runtime_success_recovered_test_failures"
    } else {
        "runtime_success"
    };
    Classification {
        grade: Grade::Pass,
        reason_code: reason_code.to_string(),
        next_action: NextAction::Advance,
        evidence: json!({
            "exit_code": input.result.exit_code,
            "test_commands": test_signals,
            "changed_files_count": input.diff_summary.changed_files_count,
            "added_lines": input.diff_summary.added_lines,
            "allowlisted_test_failure_matches": allowlisted_matches,
        }),
    }
}

/// Semantic override (§4.6, gated by grading mode). Only reconsiders the
/// two "missing/insufficient test evidence" rules verdicts; anything else
/// passes through untouched.
pub fn apply_semantic_override(
    classification: Classification,
    grading_mode: forgerun_config::GradingMode,
    run_state: RunState,
    lint_signals: &[String],
    test_signals: &[String],
    diff_summary: &DiffSummary,
    test_infra: &TestInfraSignals,
) -> Classification {
    if !grading_mode.allows_semantic_override() {
        return classification;
    }
    if !matches!(
        classification.reason_code.as_str(),
        "missing_test_evidence" | "insufficient_test_evidence"
    ) {
        return classification;
    }

    let low_risk_diff = diff_summary.changed_files_count <= 8 && diff_summary.added_lines <= 240;
    let pass_candidate = matches!(run_state, RunState::Implementing | RunState::Iterating)
        && !test_infra.any()
        && test_signals.is_empty()
        && !lint_signals.is_empty()
        && low_risk_diff;

    if !pass_candidate {
        return classification;
    }

    let mut evidence = classification.evidence.as_object().cloned().unwrap_or_default();
    evidence.insert("semantic_mode".into(), json!(format!("{grading_mode:?}")));
    evidence.insert("test_infrastructure_detected".into(), json!(test_infra.any()));
    evidence.insert("lint_or_validation_commands".into(), json!(lint_signals));
    Classification {
        grade: Grade::Pass,
        reason_code: "runtime_success_no_test_infra_with_validation".to_string(),
        next_action: NextAction::Advance,
        evidence: Value::Object(evidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgerun_config::GradingMode;

    fn input<'a>(
        result: &'a AgentProcessResult,
        commands: &'a [String],
        diff: &'a DiffSummary,
        infra: &'a TestInfraSignals,
    ) -> ClassifyInput<'a> {
        ClassifyInput {
            run_state: RunState::Implementing,
            result,
            preflight_report: None,
            commands,
            diff_summary: diff,
            allow_agent_push: true,
            max_changed_files: 8,
            max_added_lines: 150,
            max_retryable_attempts: 3,
            min_test_commands: 1,
            test_failure_allowlist: &[],
            failed_test_commands: &[],
            attempt_no: 1,
            grading_mode: GradingMode::Rules,
            test_infra: infra,
        }
    }

    #[test]
    fn success_with_test_command_and_small_diff_passes() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 100 };
        let commands = vec!["pytest -q".to_string()];
        let diff = DiffSummary { changed_files_count: 2, added_lines: 40 };
        let infra = TestInfraSignals::default();
        let c = classify_agent_runtime(&input(&result, &commands, &diff, &infra));
        assert_eq!(c.grade, Grade::Pass);
        assert_eq!(c.reason_code, "runtime_success");
    }

    #[test]
    fn success_without_test_evidence_escalates() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 100 };
        let commands = vec!["git status".to_string()];
        let diff = DiffSummary { changed_files_count: 2, added_lines: 10 };
        let infra = TestInfraSignals::default();
        let c = classify_agent_runtime(&input(&result, &commands, &diff, &infra));
        assert_eq!(c.grade, Grade::HumanReview);
        assert_eq!(c.reason_code, "missing_test_evidence");
    }

    #[test]
    fn diff_budget_exceeded_escalates_even_with_tests() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 100 };
        let commands = vec!["pytest -q".to_string()];
        let diff = DiffSummary { changed_files_count: 99, added_lines: 10 };
        let infra = TestInfraSignals::default();
        let c = classify_agent_runtime(&input(&result, &commands, &diff, &infra));
        assert_eq!(c.reason_code, "diff_budget_exceeded");
    }

    #[test]
    fn hard_failure_text_escalates_without_retry() {
        let result = AgentProcessResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "fatal: repository not found".to_string(),
            duration_ms: 50,
        };
        let commands: Vec<String> = vec![];
        let diff = DiffSummary::default();
        let infra = TestInfraSignals::default();
        let c = classify_agent_runtime(&input(&result, &commands, &diff, &infra));
        assert_eq!(c.grade, Grade::HumanReview);
        assert_eq!(c.reason_code, "runtime_hard_failure");
    }

    #[test]
    fn retryable_failure_over_attempt_cap_becomes_human_review() {
        let result = AgentProcessResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "connection reset by peer".to_string(),
            duration_ms: 50,
        };
        let commands: Vec<String> = vec![];
        let diff = DiffSummary::default();
        let infra = TestInfraSignals::default();
        let mut i = input(&result, &commands, &diff, &infra);
        i.attempt_no = 4;
        let c = classify_agent_runtime(&i);
        assert_eq!(c.grade, Grade::HumanReview);
        assert_eq!(c.reason_code, "retryable_limit_exceeded");
    }

    #[test]
    fn safety_violation_overrides_even_a_clean_exit() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 10 };
        let commands = vec!["sudo rm -rf /tmp/x".to_string()];
        let diff = DiffSummary::default();
        let infra = TestInfraSignals::default();
        let c = classify_agent_runtime(&input(&result, &commands, &diff, &infra));
        assert_eq!(c.reason_code, "safety_violation");
    }

    #[test]
    fn semantic_override_upgrades_no_test_infra_with_lint_validation() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 10 };
        let commands = vec!["ruff check .".to_string()];
        let diff = DiffSummary { changed_files_count: 2, added_lines: 20 };
        let infra = TestInfraSignals::default();
        let mut i = input(&result, &commands, &diff, &infra);
        i.grading_mode = GradingMode::Hybrid;
        let rules = classify_agent_runtime(&i);
        assert_eq!(rules.reason_code, "missing_test_evidence");
        let test_signals: Vec<String> = vec![];
        let lint_signals = vec!["ruff check .".to_string()];
        let upgraded =
            apply_semantic_override(rules, GradingMode::Hybrid, RunState::Implementing, &lint_signals, &test_signals, &diff, &infra);
        assert_eq!(upgraded.grade, Grade::Pass);
        assert_eq!(upgraded.reason_code, "runtime_success_no_test_infra_with_validation");
    }

    #[test]
    fn allowlisted_test_failure_clears_and_reports_its_own_reason_code() {
        let result = AgentProcessResult {
            exit_code: 0,
            stdout: "1 failed, known flaky test xyz".to_string(),
            stderr: String::new(),
            duration_ms: 10,
        };
        let commands = vec!["pytest -q".to_string()];
        let diff = DiffSummary { changed_files_count: 1, added_lines: 5 };
        let infra = TestInfraSignals::default();
        let mut i = input(&result, &commands, &diff, &infra);
        let failed = vec!["pytest -q".to_string()];
        i.failed_test_commands = &failed;
        let allowlist = vec!["known flaky".to_string()];
        i.test_failure_allowlist = &allowlist;
        let c = classify_agent_runtime(&i);
        assert_eq!(c.grade, Grade::Pass);
        assert_eq!(c.reason_code, "runtime_success_allowlisted_test_failures");
    }

    #[test]
    fn non_allowlisted_mid_run_failure_with_clean_exit_is_recovered() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 10 };
        let commands = vec!["pytest -q".to_string()];
        let diff = DiffSummary { changed_files_count: 1, added_lines: 5 };
        let infra = TestInfraSignals::default();
        let mut i = input(&result, &commands, &diff, &infra);
        let failed = vec!["pytest -q".to_string()];
        i.failed_test_commands = &failed;
        let c = classify_agent_runtime(&i);
        assert_eq!(c.grade, Grade::Pass);
        assert_eq!(c.reason_code, "runtime_success_recovered_test_failures");
    }

    #[test]
    fn semantic_override_disabled_in_rules_mode() {
        let result = AgentProcessResult { exit_code: 0, stdout: String::new(), stderr: String::new(), duration_ms: 10 };
        let commands = vec!["ruff check .".to_string()];
        let diff = DiffSummary { changed_files_count: 2, added_lines: 20 };
        let infra = TestInfraSignals::default();
        let i = input(&result, &commands, &diff, &infra);
        let rules = classify_agent_runtime(&i);
        let lint_signals = vec!["ruff check .".to_string()];
        let test_signals: Vec<String> = vec![];
        let unchanged =
            apply_semantic_override(rules.clone(), GradingMode::Rules, RunState::Implementing, &lint_signals, &test_signals, &diff, &infra);
        assert_eq!(unchanged.reason_code, rules.reason_code);
    }
}
