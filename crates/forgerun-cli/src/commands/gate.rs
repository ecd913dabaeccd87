//! On-demand PR gate readiness evaluation (§4.7, §6: `evaluatePrGate`).

use anyhow::{Context, Result};
use forgerun_artifacts::RunDigest;
use forgerun_config::PolicyBlock;
use forgerun_schemas::ArtifactKind;

pub async fn gate_evaluate(run_id: String, config_paths: Vec<String>) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;

    let policy = if config_paths.is_empty() {
        PolicyBlock::default()
    } else {
        let path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
        let loaded = forgerun_config::load_layered_yaml(&path_refs)?;
        PolicyBlock::from_config_json(&loaded.config_json)
    };

    let contract = forgerun_store::latest_artifact_of_kind(&pool, &run_id, ArtifactKind::Contract).await?;
    let digest_row = forgerun_store::latest_artifact_of_kind(&pool, &run_id, ArtifactKind::RunDigest).await?;
    let digest: Option<RunDigest> = digest_row
        .map(|row| serde_json::from_value(row.metadata).context("run_digest artifact did not decode"))
        .transpose()?;

    let readiness = forgerun_gate::evaluate_pr_gate_readiness(digest.as_ref(), &policy, contract.is_some());

    println!("run_id={run_id}");
    println!("ok={}", readiness.ok);
    for c in &readiness.failed_checks {
        println!("failed_check={} {}", c.code, c.message);
    }
    for w in &readiness.warnings {
        println!("warning={} {}", w.code, w.message);
    }

    Ok(())
}
