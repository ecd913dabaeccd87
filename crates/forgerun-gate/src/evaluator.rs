//! PR gate / readiness evaluator (§4.7). Given the latest run digest, the
//! expected policy block, and whether a contract artifact is bound to the
//! run, decide whether the PR is ready to merge.

use forgerun_artifacts::RunDigest;
use forgerun_config::PolicyBlock;

use crate::types::{CheckItem, GateReadiness, ACCEPTED_PASS_REASON_CODES};

/// Evaluate PR gate readiness from the latest digest and the expected policy.
///
/// `digest == None` means no classification has ever been recorded for the
/// run; that alone is a terminal failure (`missing_digest`) and short-circuits
/// the rest of the checks, matching the digest-less early return upstream.
pub fn evaluate_pr_gate_readiness(
    digest: Option<&RunDigest>,
    policy: &PolicyBlock,
    contract_available: bool,
) -> GateReadiness {
    let mut failed_checks = Vec::new();

    if !contract_available {
        failed_checks.push(CheckItem::new(
            "missing_contract",
            "contract artifact is required for PR gate",
        ));
    }

    let Some(digest) = digest else {
        failed_checks.push(CheckItem::new(
            "missing_digest",
            "latest run_digest is required for PR gate",
        ));
        return GateReadiness::failed(failed_checks, Vec::new());
    };

    let mut warnings = Vec::new();

    let accepted_reason = ACCEPTED_PASS_REASON_CODES.contains(&digest.reason_code.as_str());
    if digest.grade != "PASS" {
        failed_checks.push(CheckItem::new(
            "runtime_not_pass",
            format!("classification grade={}", digest.grade),
        ));
    }
    if !accepted_reason {
        failed_checks.push(CheckItem::new(
            "runtime_not_runtime_success",
            format!("classification reason_code={}", digest.reason_code),
        ));
    }

    if !digest.preflight_ok {
        failed_checks.push(CheckItem::new(
            "preflight_not_ok",
            "preflight must be ok in latest run_digest",
        ));
    }

    if digest.safety_violation_count > 0 {
        failed_checks.push(CheckItem::new(
            "safety_violation_present",
            format!("violation_count={}", digest.safety_violation_count),
        ));
    }

    let no_test_infra_semantic_pass =
        digest.grade == "PASS" && digest.reason_code == "runtime_success_no_test_infra_with_validation";
    if policy.min_test_commands > 0 && digest.observed_test_commands < policy.min_test_commands {
        if no_test_infra_semantic_pass {
            warnings.push(CheckItem::new(
                "semantic_no_test_infra_override",
                format!(
                    "required={}, observed={}, runtime_grading_mode={:?}",
                    policy.min_test_commands, digest.observed_test_commands, policy.grading_mode
                ),
            ));
        } else {
            failed_checks.push(CheckItem::new(
                "insufficient_test_evidence",
                format!(
                    "required={}, observed={}",
                    policy.min_test_commands, digest.observed_test_commands
                ),
            ));
        }
    }

    if digest.failed_test_commands > 0 {
        if digest.grade == "PASS" && accepted_reason {
            warnings.push(CheckItem::new(
                "failed_test_commands_observed_but_converged",
                format!("failed_test_command_count={}", digest.failed_test_commands),
            ));
        } else {
            failed_checks.push(CheckItem::new(
                "failed_test_commands_present",
                format!("failed_test_command_count={}", digest.failed_test_commands),
            ));
        }
    }

    if policy.max_changed_files > 0 && digest.changed_files > policy.max_changed_files {
        failed_checks.push(CheckItem::new(
            "changed_files_budget_exceeded",
            format!("max={}, observed={}", policy.max_changed_files, digest.changed_files),
        ));
    }
    if policy.max_added_lines > 0 && digest.added_lines > policy.max_added_lines {
        failed_checks.push(CheckItem::new(
            "added_lines_budget_exceeded",
            format!("max={}, observed={}", policy.max_added_lines, digest.added_lines),
        ));
    }

    let expected_mode = policy.skills_mode.as_str();
    let actual_mode = digest.skills_mode.as_str();
    if !expected_mode.is_empty() && !actual_mode.is_empty() && expected_mode != actual_mode {
        failed_checks.push(CheckItem::new(
            "skills_mode_mismatch",
            format!("expected={expected_mode}, observed={actual_mode}"),
        ));
    }
    if policy.skills_mode.requires_skill_plan() && !digest.missing_required_skills.is_empty() {
        failed_checks.push(CheckItem::new(
            "missing_required_skills",
            digest.missing_required_skills.join(", "),
        ));
    }

    GateReadiness::failed(failed_checks, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forgerun_config::{GradingMode, SkillsMode};

    fn passing_digest() -> RunDigest {
        RunDigest {
            grade: "PASS".to_string(),
            reason_code: "runtime_success".to_string(),
            attempt_no: 1,
            changed_files: 2,
            added_lines: 40,
            observed_test_commands: 1,
            failed_test_commands: 0,
            safety_violation_count: 0,
            preflight_ok: true,
            skills_mode: "off".to_string(),
            missing_required_skills: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_contract_is_a_failed_check_even_with_a_passing_digest() {
        let readiness = evaluate_pr_gate_readiness(Some(&passing_digest()), &PolicyBlock::default(), false);
        assert!(!readiness.ok);
        assert!(readiness.failed_checks.iter().any(|c| c.code == "missing_contract"));
    }

    #[test]
    fn missing_digest_short_circuits_with_only_that_check() {
        let readiness = evaluate_pr_gate_readiness(None, &PolicyBlock::default(), true);
        assert!(!readiness.ok);
        assert_eq!(readiness.failed_checks.len(), 1);
        assert_eq!(readiness.failed_checks[0].code, "missing_digest");
    }

    #[test]
    fn clean_pass_with_contract_is_ok() {
        let readiness = evaluate_pr_gate_readiness(Some(&passing_digest()), &PolicyBlock::default(), true);
        assert!(readiness.ok);
        assert!(readiness.failed_checks.is_empty());
    }

    #[test]
    fn no_test_infra_override_becomes_a_warning_not_a_failure() {
        let mut digest = passing_digest();
        digest.reason_code = "runtime_success_no_test_infra_with_validation".to_string();
        digest.observed_test_commands = 0;
        let policy = PolicyBlock {
            min_test_commands: 1,
            grading_mode: GradingMode::Hybrid,
            ..PolicyBlock::default()
        };
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &policy, true);
        assert!(readiness.ok);
        assert!(readiness.warnings.iter().any(|c| c.code == "semantic_no_test_infra_override"));
    }

    #[test]
    fn insufficient_test_evidence_fails_without_the_override_reason() {
        let mut digest = passing_digest();
        digest.observed_test_commands = 0;
        let policy = PolicyBlock {
            min_test_commands: 1,
            ..PolicyBlock::default()
        };
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &policy, true);
        assert!(!readiness.ok);
        assert!(readiness
            .failed_checks
            .iter()
            .any(|c| c.code == "insufficient_test_evidence"));
    }

    #[test]
    fn failed_test_commands_on_a_converged_pass_is_only_a_warning() {
        let mut digest = passing_digest();
        digest.failed_test_commands = 2;
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &PolicyBlock::default(), true);
        assert!(readiness.ok);
        assert!(readiness
            .warnings
            .iter()
            .any(|c| c.code == "failed_test_commands_observed_but_converged"));
    }

    #[test]
    fn failed_test_commands_on_a_non_pass_grade_fails_the_gate() {
        let mut digest = passing_digest();
        digest.grade = "HUMAN_REVIEW".to_string();
        digest.failed_test_commands = 2;
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &PolicyBlock::default(), true);
        assert!(!readiness.ok);
        assert!(readiness.failed_checks.iter().any(|c| c.code == "failed_test_commands_present"));
    }

    #[test]
    fn diff_budget_exceeded_fails_both_checks_independently() {
        let mut digest = passing_digest();
        digest.changed_files = 99;
        digest.added_lines = 9999;
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &PolicyBlock::default(), true);
        assert!(readiness
            .failed_checks
            .iter()
            .any(|c| c.code == "changed_files_budget_exceeded"));
        assert!(readiness
            .failed_checks
            .iter()
            .any(|c| c.code == "added_lines_budget_exceeded"));
    }

    #[test]
    fn skills_mode_mismatch_is_reported() {
        let mut digest = passing_digest();
        digest.skills_mode = "agentpr".to_string();
        let policy = PolicyBlock {
            skills_mode: SkillsMode::AgentPrAutonomous,
            ..PolicyBlock::default()
        };
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &policy, true);
        assert!(!readiness.ok);
        assert!(readiness.failed_checks.iter().any(|c| c.code == "skills_mode_mismatch"));
    }

    #[test]
    fn missing_required_skills_only_matters_in_agentpr_modes() {
        let mut digest = passing_digest();
        digest.skills_mode = "agentpr".to_string();
        digest.missing_required_skills = vec!["rust-cargo".to_string()];
        let policy = PolicyBlock {
            skills_mode: SkillsMode::AgentPr,
            ..PolicyBlock::default()
        };
        let readiness = evaluate_pr_gate_readiness(Some(&digest), &policy, true);
        assert!(!readiness.ok);
        assert!(readiness
            .failed_checks
            .iter()
            .any(|c| c.code == "missing_required_skills"));
    }
}
