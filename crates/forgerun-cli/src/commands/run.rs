//! Run-lifecycle command handlers.
//!
//! Covers all subcommands of `forgerun run`: create, apply-event, snapshot,
//! list, artifacts.

use anyhow::{Context, Result};
use forgerun_audit::AuditWriter;
use forgerun_schemas::{EventType, IdGen, UuidRunIdGen};
use serde_json::Value;

use super::{load_payload, parse_run_mode};

// ---------------------------------------------------------------------------
// run create
// ---------------------------------------------------------------------------

pub async fn run_create(owner: String, repo: String, mode: String, prompt_version: String, budget: Value) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let run_id = UuidRunIdGen.new_run_id();
    let run_mode = parse_run_mode(&mode)?;

    forgerun_store::insert_run(
        &pool,
        &forgerun_store::NewRun {
            run_id: run_id.clone(),
            owner: owner.clone(),
            repo: repo.clone(),
            prompt_version,
            mode: run_mode,
            budget,
            workspace_dir: format!("/tmp/forgerun/{run_id}"),
        },
    )
    .await?;

    println!("run_id={run_id}");
    println!("owner={owner}");
    println!("repo={repo}");
    println!("mode={}", run_mode.as_str());
    println!("state=QUEUED");

    Ok(())
}

// ---------------------------------------------------------------------------
// run apply-event
// ---------------------------------------------------------------------------

pub async fn run_apply_event(
    run_id: String,
    event_type: String,
    payload: Option<String>,
    payload_file: Option<String>,
    idempotency_key: Option<String>,
    audit_log_path: String,
) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let event = EventType::parse(&event_type)
        .with_context(|| format!("unknown event type '{event_type}'"))?;
    let payload = load_payload(payload, payload_file)?;

    let mut audit = AuditWriter::new(&audit_log_path, true).context("open audit log")?;
    let result = forgerun_coordinator::apply(&pool, &mut audit, &run_id, event, payload, idempotency_key).await?;

    println!("run_id={run_id}");
    println!("event={event_type}");
    println!("duplicate={}", result.duplicate);
    println!("from_state={}", result.from_state.as_str());
    println!("to_state={}", result.to_state.as_str());

    Ok(())
}

// ---------------------------------------------------------------------------
// run snapshot
// ---------------------------------------------------------------------------

pub async fn run_snapshot(run_id: String) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let r = forgerun_store::fetch_run(&pool, &run_id).await?;

    println!("run_id={}", r.run_id);
    println!("owner={}", r.owner);
    println!("repo={}", r.repo);
    println!("prompt_version={}", r.prompt_version);
    println!("mode={}", r.mode.as_str());
    println!("state={}", r.state.as_str());
    println!("pr_number={}", r.pr_number.map(|n| n.to_string()).unwrap_or_default());
    println!("last_error={}", r.last_error.clone().unwrap_or_default());
    println!("created_at={}", r.created_at.to_rfc3339());
    println!("updated_at={}", r.updated_at.to_rfc3339());

    Ok(())
}

// ---------------------------------------------------------------------------
// run list
// ---------------------------------------------------------------------------

pub async fn run_list(limit: i64) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let runs = forgerun_store::list_runs(&pool, limit).await?;
    for r in runs {
        println!(
            "run_id={} owner={} repo={} pr_number={} state={}",
            r.run_id,
            r.owner,
            r.repo,
            r.pr_number.map(|n| n.to_string()).unwrap_or_default(),
            r.state.as_str(),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// run artifacts
// ---------------------------------------------------------------------------

pub async fn run_artifacts(run_id: String) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let artifacts = forgerun_store::list_artifacts(&pool, &run_id).await?;
    for a in artifacts {
        println!("kind={} uri={} created_at={}", a.kind.as_str(), a.uri, a.created_at.to_rfc3339());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// run step-attempts
// ---------------------------------------------------------------------------

pub async fn run_step_attempts(run_id: String) -> Result<()> {
    let pool = forgerun_store::connect_from_env().await?;
    let attempts = forgerun_store::list_step_attempts(&pool, &run_id).await?;
    for a in attempts {
        println!(
            "step={} attempt_no={} exit_code={} duration_ms={} created_at={}",
            a.step,
            a.attempt_no,
            a.exit_code.map(|c| c.to_string()).unwrap_or_default(),
            a.duration_ms,
            a.created_at.to_rfc3339(),
        );
    }
    Ok(())
}
