//! On-demand invocation of the external synchronization engine (§4.5: "a
//! periodic worker and on-demand CLI"). `forgerun-daemon` owns the periodic
//! half; this is the operator-triggered half, useful for re-polling a single
//! run without waiting for the next tick.

use anyhow::{bail, Context, Result};
use forgerun_audit::AuditWriter;
use forgerun_hosting::GithubClient;
use forgerun_sync::RunSnapshot;

pub async fn sync_run(run_id: String, audit_log_path: String) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let run = forgerun_store::fetch_run(&pool, &run_id).await?;

    let snapshot = RunSnapshot {
        run_id: run.run_id.clone(),
        state: run.state,
        pr_number: run.pr_number,
    };
    if !forgerun_sync::is_active(&snapshot) {
        println!("run_id={run_id} skipped=true reason=not_active state={}", run.state.as_str());
        return Ok(());
    }
    let Some(pr_number) = run.pr_number else {
        bail!("run {run_id} has no linked PR");
    };

    let token = std::env::var("FORGERUN_GITHUB_TOKEN").context("FORGERUN_GITHUB_TOKEN is required for sync")?;
    let hosting = GithubClient::new(token)?;
    let raw = hosting.fetch_pull_request_view(&run.owner, &run.repo, pr_number).await?;
    let pr_view: forgerun_sync::PrView = serde_json::from_value(raw).context("PR view payload did not decode")?;

    let events = forgerun_sync::synchronize(&snapshot, &pr_view);
    if events.is_empty() {
        println!("run_id={run_id} events_applied=0");
        return Ok(());
    }

    let mut audit = AuditWriter::new(&audit_log_path, true).context("open audit log")?;
    let mut applied = 0u32;
    for event in events {
        let result =
            forgerun_coordinator::apply(&pool, &mut audit, &event.run_id, event.event_type, event.payload, None)
                .await?;
        if !result.duplicate {
            applied += 1;
            println!("run_id={run_id} event={} {} -> {}", event.event_type, result.from_state.as_str(), result.to_state.as_str());
        }
    }
    println!("run_id={run_id} events_applied={applied}");

    Ok(())
}
