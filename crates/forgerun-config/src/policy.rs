//! Policy block consumed by the runtime evidence classifier (§4.6) and the
//! PR gate / readiness evaluator (§4.7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Grading mode controls whether a semantic override / LLM oracle may
/// upgrade a `missing_test_evidence` verdict to PASS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    Rules,
    Hybrid,
    HybridLlm,
}

impl Default for GradingMode {
    fn default() -> Self {
        GradingMode::Rules
    }
}

impl GradingMode {
    pub fn allows_semantic_override(&self) -> bool {
        matches!(self, GradingMode::Hybrid | GradingMode::HybridLlm)
    }

    pub fn allows_llm_oracle(&self) -> bool {
        matches!(self, GradingMode::HybridLlm)
    }
}

/// Skills-mode governs whether the run's agent drives itself through a
/// declared skill plan at all, and if so, under staged orchestrator control
/// (`agentpr`) or unattended (`agentpr_autonomous`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillsMode {
    Off,
    AgentPr,
    AgentPrAutonomous,
}

impl Default for SkillsMode {
    fn default() -> Self {
        SkillsMode::Off
    }
}

impl SkillsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillsMode::Off => "off",
            SkillsMode::AgentPr => "agentpr",
            SkillsMode::AgentPrAutonomous => "agentpr_autonomous",
        }
    }

    /// `true` for the two modes where a declared skill plan is mandatory
    /// and missing required skills must fail the PR gate (§4.7).
    pub fn requires_skill_plan(&self) -> bool {
        matches!(self, SkillsMode::AgentPr | SkillsMode::AgentPrAutonomous)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBlock {
    #[serde(default = "default_min_test_commands")]
    pub min_test_commands: u32,
    #[serde(default = "default_max_changed_files")]
    pub max_changed_files: u32,
    #[serde(default = "default_max_added_lines")]
    pub max_added_lines: u32,
    #[serde(default = "default_max_retryable_attempts")]
    pub max_retryable_attempts: u32,
    #[serde(default)]
    pub grading_mode: GradingMode,
    /// Regex patterns; a match against stderr+stdout clears failed test markers.
    #[serde(default)]
    pub test_failure_allowlist: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub skills_mode: SkillsMode,
}

fn default_min_test_commands() -> u32 {
    1
}
fn default_max_changed_files() -> u32 {
    8
}
fn default_max_added_lines() -> u32 {
    150
}
fn default_max_retryable_attempts() -> u32 {
    3
}

impl Default for PolicyBlock {
    fn default() -> Self {
        Self {
            min_test_commands: default_min_test_commands(),
            max_changed_files: default_max_changed_files(),
            max_added_lines: default_max_added_lines(),
            max_retryable_attempts: default_max_retryable_attempts(),
            grading_mode: GradingMode::default(),
            test_failure_allowlist: Vec::new(),
            required_skills: Vec::new(),
            skills_mode: SkillsMode::default(),
        }
    }
}

impl PolicyBlock {
    /// Extract a `policy` sub-object from a loaded config document, falling
    /// back to defaults for any field it omits.
    pub fn from_config_json(config_json: &Value) -> Self {
        match config_json.get("policy") {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
            None => Self::default(),
        }
    }
}
