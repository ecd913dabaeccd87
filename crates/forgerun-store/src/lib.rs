//! Embedded storage engine (SPEC_FULL.md §5, §6): the sole mutable shared
//! resource. Five core tables — runs, run_states, events, step_attempts,
//! artifacts — plus webhook_deliveries. Every write that mutates a run's
//! lifecycle goes through [`apply_event`], which performs the §4.2 event
//! coordinator algorithm inside one serializable transaction.

use anyhow::Context;
use chrono::{DateTime, Utc};
use forgerun_schemas::{ArtifactKind, CoreError, EventType, RunMode, RunState};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

pub const ENV_DB_URL: &str = "FORGERUN_DATABASE_URL";

/// Connect to the configured SQLite database. `PRAGMA foreign_keys=ON` is
/// set on every connection; it is off by default in SQLite.
pub async fn connect_from_env() -> anyhow::Result<SqlitePool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to sqlite")?;
    sqlx::query("pragma foreign_keys = on")
        .execute(&pool)
        .await
        .context("enabling foreign_keys pragma failed")?;
    Ok(pool)
}

/// Run embedded sqlx migrations.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_runs_table: bool,
}

pub async fn status(pool: &SqlitePool) -> anyhow::Result<DbStatus> {
    let (one,): (i64,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let exists: Option<(String,)> = sqlx::query_as(
        "select name from sqlite_master where type='table' and name='runs'",
    )
    .fetch_optional(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_runs_table: exists.is_some(),
    })
}

/// Immutable creation metadata plus the mutable lifecycle projection,
/// joined for callers (§3's `Run`, minus the `Run` type's own state field
/// being split across two tables at rest).
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    pub prompt_version: String,
    pub mode: RunMode,
    pub budget: Value,
    pub workspace_dir: String,
    pub pr_number: Option<i64>,
    pub state: RunState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub owner: String,
    pub repo: String,
    pub prompt_version: String,
    pub mode: RunMode,
    pub budget: Value,
    pub workspace_dir: String,
}

/// Sole writer of the `runs` table (§4.1: "Runs are created by the
/// `command.run.create` event, sole writer").
pub async fn insert_run(pool: &SqlitePool, run: &NewRun) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("begin insert_run tx")?;

    sqlx::query(
        r#"
        insert into runs (run_id, owner, repo, prompt_version, mode, budget_json, workspace_dir, created_at)
        values (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.run_id)
    .bind(&run.owner)
    .bind(&run.repo)
    .bind(&run.prompt_version)
    .bind(run.mode.as_str())
    .bind(run.budget.to_string())
    .bind(&run.workspace_dir)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .context("insert into runs failed")?;

    sqlx::query(
        r#"
        insert into run_states (run_id, state, pr_number, last_error, updated_at)
        values (?, ?, null, null, ?)
        "#,
    )
    .bind(&run.run_id)
    .bind(RunState::Queued.as_str())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .context("insert into run_states failed")?;

    tx.commit().await.context("commit insert_run tx")?;
    Ok(())
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<RunSnapshot, CoreError> {
    let budget_str: String = row.try_get("budget_json").map_err(CoreError::Storage)?;
    let budget: Value = serde_json::from_str(&budget_str)
        .map_err(|e| CoreError::InvalidJson(e.to_string()))?;
    let mode_str: String = row.try_get("mode").map_err(CoreError::Storage)?;
    let state_str: String = row.try_get("state").map_err(CoreError::Storage)?;
    let created_at: String = row.try_get("created_at").map_err(CoreError::Storage)?;
    let updated_at: String = row.try_get("updated_at").map_err(CoreError::Storage)?;

    Ok(RunSnapshot {
        run_id: row.try_get("run_id").map_err(CoreError::Storage)?,
        owner: row.try_get("owner").map_err(CoreError::Storage)?,
        repo: row.try_get("repo").map_err(CoreError::Storage)?,
        prompt_version: row.try_get("prompt_version").map_err(CoreError::Storage)?,
        mode: RunMode::parse(&mode_str)
            .ok_or_else(|| CoreError::InvalidJson(format!("unknown mode {mode_str}")))?,
        budget,
        workspace_dir: row.try_get("workspace_dir").map_err(CoreError::Storage)?,
        pr_number: row.try_get("pr_number").map_err(CoreError::Storage)?,
        state: RunState::parse(&state_str)
            .ok_or_else(|| CoreError::InvalidJson(format!("unknown state {state_str}")))?,
        last_error: row.try_get("last_error").map_err(CoreError::Storage)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| CoreError::InvalidJson(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| CoreError::InvalidJson(e.to_string()))?
            .with_timezone(&Utc),
    })
}

const RUN_SNAPSHOT_QUERY: &str = r#"
    select r.run_id, r.owner, r.repo, r.prompt_version, r.mode, r.budget_json,
           r.workspace_dir, r.created_at, s.state, s.pr_number, s.last_error, s.updated_at
    from runs r join run_states s on s.run_id = r.run_id
    where r.run_id = ?
"#;

pub async fn fetch_run(pool: &SqlitePool, run_id: &str) -> Result<RunSnapshot, CoreError> {
    let row = sqlx::query(RUN_SNAPSHOT_QUERY)
        .bind(run_id)
        .fetch_optional(pool)
        .await
        .map_err(CoreError::Storage)?
        .ok_or_else(|| CoreError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
    row_to_snapshot(&row)
}

pub async fn list_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<RunSnapshot>, CoreError> {
    let rows = sqlx::query(
        r#"
        select r.run_id, r.owner, r.repo, r.prompt_version, r.mode, r.budget_json,
               r.workspace_dir, r.created_at, s.state, s.pr_number, s.last_error, s.updated_at
        from runs r join run_states s on s.run_id = r.run_id
        order by r.created_at desc
        limit ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(CoreError::Storage)?;

    rows.iter().map(row_to_snapshot).collect()
}

/// Locate the latest run for `(owner, repo, pr_number)` (webhook ingress
/// §4.4 step 8's "locate the latest run").
pub async fn find_latest_run_for_pr(
    pool: &SqlitePool,
    owner: &str,
    repo: &str,
    pr_number: i64,
) -> Result<Option<RunSnapshot>, CoreError> {
    let row = sqlx::query(
        r#"
        select r.run_id, r.owner, r.repo, r.prompt_version, r.mode, r.budget_json,
               r.workspace_dir, r.created_at, s.state, s.pr_number, s.last_error, s.updated_at
        from runs r join run_states s on s.run_id = r.run_id
        where r.owner = ? and r.repo = ? and s.pr_number = ?
        order by r.created_at desc
        limit 1
        "#,
    )
    .bind(owner)
    .bind(repo)
    .bind(pr_number)
    .fetch_optional(pool)
    .await
    .map_err(CoreError::Storage)?;

    row.as_ref().map(row_to_snapshot).transpose()
}

/// Outcome of [`apply_event`] (§4.2).
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub duplicate: bool,
    pub from_state: RunState,
    pub to_state: RunState,
}

/// The §4.2 event coordinator algorithm, run inside one transaction.
///
/// `resolve_target` implements the §4.3 event -> target-state table; it is
/// supplied by the caller (kept pure, so it can be unit tested without a
/// database) and receives `(current_state, event_type, payload)`.
pub async fn apply_event(
    pool: &SqlitePool,
    run_id: &str,
    event_type: EventType,
    idempotency_key: &str,
    payload: Value,
    resolve_target: impl FnOnce(RunState, EventType, &Value) -> Option<RunState>,
) -> Result<ApplyOutcome, CoreError> {
    let mut tx = pool.begin().await.map_err(CoreError::Storage)?;

    // 1. Require the run exists.
    let row = sqlx::query(
        "select state, pr_number from run_states where run_id = ?",
    )
    .bind(run_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(CoreError::Storage)?
    .ok_or_else(|| CoreError::RunNotFound {
        run_id: run_id.to_string(),
    })?;
    let state_str: String = row.try_get("state").map_err(CoreError::Storage)?;
    let current = RunState::parse(&state_str)
        .ok_or_else(|| CoreError::InvalidJson(format!("unknown state {state_str}")))?;

    // 2. Insert the event under (run_id, idempotency_key); duplicates short-circuit.
    let now = Utc::now();
    let payload_str = serde_json::to_string(&payload)
        .map_err(|e| CoreError::InvalidJson(e.to_string()))?;
    let inserted = sqlx::query(
        r#"
        insert into events (run_id, event_type, idempotency_key, payload_json, created_at)
        values (?, ?, ?, ?, ?)
        on conflict(run_id, idempotency_key) do nothing
        "#,
    )
    .bind(run_id)
    .bind(event_type.as_str())
    .bind(idempotency_key)
    .bind(&payload_str)
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(CoreError::Storage)?;

    if inserted.rows_affected() == 0 {
        tx.commit().await.map_err(CoreError::Storage)?;
        return Ok(ApplyOutcome {
            duplicate: true,
            from_state: current,
            to_state: current,
        });
    }

    // 3. Resolve target state.
    let target = match resolve_target(current, event_type, &payload) {
        Some(t) => t,
        None => {
            if event_type.is_mandatory_transition() {
                return Err(CoreError::IllegalTransition {
                    from: current,
                    to: current,
                });
            }
            tx.commit().await.map_err(CoreError::Storage)?;
            return Ok(ApplyOutcome {
                duplicate: false,
                from_state: current,
                to_state: current,
            });
        }
    };

    // 4. Assert legality and persist. An illegal transition propagates to the
    // caller as `Err(CoreError::IllegalTransition)` rather than being
    // downgraded here — only the webhook dispatch path (§4.4 step 8) treats
    // that error as "ignored"; other callers (CLI, sync worker) must see it.
    forgerun_schemas::assert_transition(current, target)?;
    let last_error = derive_last_error(event_type, &payload);
    sqlx::query("update run_states set state = ?, last_error = ?, updated_at = ? where run_id = ?")
        .bind(target.as_str())
        .bind(&last_error)
        .bind(now.to_rfc3339())
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::Storage)?;

    // 5. Event-specific side writes.
    match event_type {
        EventType::CommandPrLinked => {
            if let Some(pr_number) = payload.get("pr_number").and_then(Value::as_i64) {
                sqlx::query("update run_states set pr_number = ? where run_id = ?")
                    .bind(pr_number)
                    .bind(run_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(CoreError::Storage)?;
            }
        }
        EventType::WorkerDiscoveryCompleted => {
            if let Some(contract_path) = payload.get("contract_path").and_then(Value::as_str) {
                insert_artifact_tx(&mut tx, run_id, ArtifactKind::Contract, contract_path, Value::Null, now)
                    .await?;
            }
        }
        EventType::WorkerPushCompleted => {
            if let Some(branch) = payload.get("branch").and_then(Value::as_str) {
                insert_artifact_tx(
                    &mut tx,
                    run_id,
                    ArtifactKind::Branch,
                    &format!("branch://{branch}"),
                    serde_json::json!({ "branch": branch }),
                    now,
                )
                .await?;
            }
        }
        _ => {}
    }

    tx.commit().await.map_err(CoreError::Storage)?;
    Ok(ApplyOutcome {
        duplicate: false,
        from_state: current,
        to_state: target,
    })
}

/// `"<step>:<reason_code>:<message>"` per §4.2 step 4.
fn derive_last_error(event_type: EventType, payload: &Value) -> Option<String> {
    match event_type {
        EventType::WorkerStepFailed => {
            let step = payload.get("step").and_then(Value::as_str).unwrap_or("unknown");
            let reason = payload.get("reason_code").and_then(Value::as_str).unwrap_or("unknown");
            let message = payload.get("message").and_then(Value::as_str).unwrap_or("");
            Some(format!("{step}:{reason}:{message}"))
        }
        EventType::TimerTimeout => {
            let step = payload.get("step").and_then(Value::as_str).unwrap_or("unknown");
            Some(format!("timeout:{step}"))
        }
        _ => None,
    }
}

async fn insert_artifact_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    run_id: &str,
    kind: ArtifactKind,
    uri: &str,
    metadata: Value,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query(
        "insert into artifacts (run_id, kind, uri, metadata_json, created_at) values (?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(kind.as_str())
    .bind(uri)
    .bind(metadata.to_string())
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(CoreError::Storage)?;
    Ok(())
}

/// Standalone artifact insert for callers outside `apply_event` (e.g. the
/// classifier boundary storing a `run_digest`/`agent_runtime_report`).
pub async fn insert_artifact(
    pool: &SqlitePool,
    run_id: &str,
    kind: ArtifactKind,
    uri: &str,
    metadata: Value,
) -> Result<(), CoreError> {
    sqlx::query(
        "insert into artifacts (run_id, kind, uri, metadata_json, created_at) values (?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(kind.as_str())
    .bind(uri)
    .bind(metadata.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(CoreError::Storage)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub kind: ArtifactKind,
    pub uri: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn list_artifacts(pool: &SqlitePool, run_id: &str) -> Result<Vec<ArtifactRow>, CoreError> {
    let rows = sqlx::query(
        "select kind, uri, metadata_json, created_at from artifacts where run_id = ? order by id asc",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .map_err(CoreError::Storage)?;

    rows.into_iter()
        .map(|row| {
            let kind_str: String = row.try_get("kind").map_err(CoreError::Storage)?;
            let metadata_str: String = row.try_get("metadata_json").map_err(CoreError::Storage)?;
            let created_at: String = row.try_get("created_at").map_err(CoreError::Storage)?;
            Ok(ArtifactRow {
                kind: parse_artifact_kind(&kind_str)?,
                uri: row.try_get("uri").map_err(CoreError::Storage)?,
                metadata: serde_json::from_str(&metadata_str)
                    .map_err(|e| CoreError::InvalidJson(e.to_string()))?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| CoreError::InvalidJson(e.to_string()))?
                    .with_timezone(&Utc),
            })
        })
        .collect()
}

pub async fn latest_artifact_of_kind(
    pool: &SqlitePool,
    run_id: &str,
    kind: ArtifactKind,
) -> Result<Option<ArtifactRow>, CoreError> {
    let row = sqlx::query(
        "select kind, uri, metadata_json, created_at from artifacts where run_id = ? and kind = ? order by id desc limit 1",
    )
    .bind(run_id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await
    .map_err(CoreError::Storage)?;

    row.map(|row| {
        let kind_str: String = row.try_get("kind").map_err(CoreError::Storage)?;
        let metadata_str: String = row.try_get("metadata_json").map_err(CoreError::Storage)?;
        let created_at: String = row.try_get("created_at").map_err(CoreError::Storage)?;
        Ok(ArtifactRow {
            kind: parse_artifact_kind(&kind_str)?,
            uri: row.try_get("uri").map_err(CoreError::Storage)?,
            metadata: serde_json::from_str(&metadata_str)
                .map_err(|e| CoreError::InvalidJson(e.to_string()))?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| CoreError::InvalidJson(e.to_string()))?
                .with_timezone(&Utc),
        })
    })
    .transpose()
}

fn parse_artifact_kind(s: &str) -> Result<ArtifactKind, CoreError> {
    Ok(match s {
        "contract" => ArtifactKind::Contract,
        "branch" => ArtifactKind::Branch,
        "agent_runtime_report" => ArtifactKind::AgentRuntimeReport,
        "run_digest" => ArtifactKind::RunDigest,
        "preflight_report" => ArtifactKind::PreflightReport,
        other => return Err(CoreError::InvalidJson(format!("unknown artifact kind {other}"))),
    })
}

/// Monotonically increasing `attempt_no` per `(run_id, step)` (§3).
pub async fn next_attempt_no(pool: &SqlitePool, run_id: &str, step: &str) -> Result<i64, CoreError> {
    let row: (Option<i64>,) = sqlx::query_as(
        "select max(attempt_no) from step_attempts where run_id = ? and step = ?",
    )
    .bind(run_id)
    .bind(step)
    .fetch_one(pool)
    .await
    .map_err(CoreError::Storage)?;
    Ok(row.0.unwrap_or(0) + 1)
}

pub async fn insert_step_attempt(
    pool: &SqlitePool,
    run_id: &str,
    step: &str,
    attempt_no: i64,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    duration_ms: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        insert into step_attempts (run_id, step, attempt_no, exit_code, stdout, stderr, duration_ms, created_at)
        values (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(step)
    .bind(attempt_no)
    .bind(exit_code)
    .bind(stdout)
    .bind(stderr)
    .bind(duration_ms)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(CoreError::Storage)?;
    Ok(())
}

/// One row of the append-only `step_attempts` evidence trail (§3).
#[derive(Debug, Clone)]
pub struct StepAttemptRow {
    pub step: String,
    pub attempt_no: i64,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// All attempts for `run_id`, oldest first. Step attempts do not drive
/// transitions; this is read-only bookkeeping for inspection/diagnostics.
pub async fn list_step_attempts(pool: &SqlitePool, run_id: &str) -> Result<Vec<StepAttemptRow>, CoreError> {
    let rows = sqlx::query(
        "select step, attempt_no, exit_code, stdout, stderr, duration_ms, created_at \
         from step_attempts where run_id = ? order by id asc",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .map_err(CoreError::Storage)?;

    rows.into_iter()
        .map(|row| {
            let created_at: String = row.try_get("created_at").map_err(CoreError::Storage)?;
            Ok(StepAttemptRow {
                step: row.try_get("step").map_err(CoreError::Storage)?,
                attempt_no: row.try_get("attempt_no").map_err(CoreError::Storage)?,
                exit_code: row.try_get("exit_code").map_err(CoreError::Storage)?,
                stdout: row.try_get("stdout").map_err(CoreError::Storage)?,
                stderr: row.try_get("stderr").map_err(CoreError::Storage)?,
                duration_ms: row.try_get("duration_ms").map_err(CoreError::Storage)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| CoreError::InvalidJson(e.to_string()))?
                    .with_timezone(&Utc),
            })
        })
        .collect()
}

/// Insert a webhook delivery row for replay defense (§4.4 step 5). Returns
/// `false` if `(source, delivery_id)` already existed (duplicate delivery).
pub async fn insert_webhook_delivery(
    pool: &SqlitePool,
    source: &str,
    delivery_id: &str,
    event_type: &str,
    body_sha256: &str,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        insert into webhook_deliveries (source, delivery_id, event_type, body_sha256, received_at)
        values (?, ?, ?, ?, ?)
        on conflict(source, delivery_id) do nothing
        "#,
    )
    .bind(source)
    .bind(delivery_id)
    .bind(event_type)
    .bind(body_sha256)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(CoreError::Storage)?;

    Ok(result.rows_affected() > 0)
}

/// Release a delivery row so the sender retries (§4.4 steps 6/10).
pub async fn release_webhook_delivery(
    pool: &SqlitePool,
    source: &str,
    delivery_id: &str,
) -> Result<(), CoreError> {
    sqlx::query("delete from webhook_deliveries where source = ? and delivery_id = ?")
        .bind(source)
        .bind(delivery_id)
        .execute(pool)
        .await
        .map_err(CoreError::Storage)?;
    Ok(())
}

/// Deletes delivery rows older than `keep_after`, bounding the replay-defense
/// table's growth. Returns the number of rows removed.
pub async fn cleanup_webhook_deliveries(
    pool: &SqlitePool,
    source: &str,
    keep_after: DateTime<Utc>,
) -> Result<u64, CoreError> {
    let result = sqlx::query("delete from webhook_deliveries where source = ? and received_at < ?")
        .bind(source)
        .bind(keep_after.to_rfc3339())
        .execute(pool)
        .await
        .map_err(CoreError::Storage)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_run(pool: &SqlitePool, run_id: &str) {
        insert_run(
            pool,
            &NewRun {
                run_id: run_id.to_string(),
                owner: "a".to_string(),
                repo: "b".to_string(),
                prompt_version: "v1".to_string(),
                mode: RunMode::PushOnly,
                budget: json!({}),
                workspace_dir: "/tmp/ws".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn insert_and_fetch_run_round_trips() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;
        let snap = fetch_run(&pool, "run_1").await.unwrap();
        assert_eq!(snap.state, RunState::Queued);
        assert_eq!(snap.owner, "a");
    }

    #[tokio::test]
    async fn fetch_missing_run_is_run_not_found() {
        let pool = setup().await;
        let err = fetch_run(&pool, "nope").await.unwrap_err();
        assert!(matches!(err, CoreError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn apply_event_happy_path_transitions_state() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;

        let outcome = apply_event(
            &pool,
            "run_1",
            EventType::CommandStartDiscovery,
            "key1",
            json!({}),
            |current, _et, _payload| match current {
                RunState::Queued => Some(RunState::Discovery),
                _ => None,
            },
        )
        .await
        .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.to_state, RunState::Discovery);

        let snap = fetch_run(&pool, "run_1").await.unwrap();
        assert_eq!(snap.state, RunState::Discovery);
    }

    #[tokio::test]
    async fn apply_event_is_idempotent_under_duplicate_key() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;

        let resolver = |current: RunState, _et: EventType, _payload: &Value| match current {
            RunState::Queued => Some(RunState::Discovery),
            _ => None,
        };

        apply_event(&pool, "run_1", EventType::CommandStartDiscovery, "key1", json!({}), resolver)
            .await
            .unwrap();
        let second = apply_event(
            &pool,
            "run_1",
            EventType::CommandStartDiscovery,
            "key1",
            json!({}),
            resolver,
        )
        .await
        .unwrap();

        assert!(second.duplicate);
        let snap = fetch_run(&pool, "run_1").await.unwrap();
        assert_eq!(snap.state, RunState::Discovery);
    }

    #[tokio::test]
    async fn apply_event_illegal_transition_propagates_as_error() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;

        // QUEUED -> PLAN_READY is not legal; resolver asks for it anyway. Only
        // the webhook dispatch path downgrades this to "ignored" — this layer
        // surfaces it.
        let outcome = apply_event(
            &pool,
            "run_1",
            EventType::WorkerDiscoveryCompleted,
            "key1",
            json!({}),
            |_current, _et, _payload| Some(RunState::PlanReady),
        )
        .await;

        assert!(matches!(outcome, Err(CoreError::IllegalTransition { .. })));

        // The event row from the same transaction must not have been
        // committed either — the whole attempt rolls back.
        let row: (i64,) = sqlx::query_as("select count(*) from events where run_id = ? and idempotency_key = ?")
            .bind("run_1")
            .bind("key1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn pr_linked_side_write_sets_pr_number() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;

        apply_event(
            &pool,
            "run_1",
            EventType::CommandPrLinked,
            "key1",
            json!({"pr_number": 42}),
            |_current, _et, _payload| Some(RunState::CiWait),
        )
        .await
        .unwrap();

        let snap = fetch_run(&pool, "run_1").await.unwrap();
        assert_eq!(snap.pr_number, Some(42));
        assert_eq!(snap.state, RunState::CiWait);
    }

    #[tokio::test]
    async fn discovery_completed_side_write_stores_contract_artifact() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;
        apply_event(
            &pool,
            "run_1",
            EventType::CommandStartDiscovery,
            "key0",
            json!({}),
            |_c, _e, _p| Some(RunState::Discovery),
        )
        .await
        .unwrap();

        apply_event(
            &pool,
            "run_1",
            EventType::WorkerDiscoveryCompleted,
            "key1",
            json!({"contract_path": "u://c"}),
            |_current, _et, _payload| Some(RunState::PlanReady),
        )
        .await
        .unwrap();

        let artifacts = list_artifacts(&pool, "run_1").await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Contract);
        assert_eq!(artifacts[0].uri, "u://c");
    }

    #[tokio::test]
    async fn step_attempts_record_and_list_in_order_with_increasing_attempt_no() {
        let pool = setup().await;
        seed_run(&pool, "run_1").await;

        let first_attempt = next_attempt_no(&pool, "run_1", "github_sync").await.unwrap();
        assert_eq!(first_attempt, 1);
        insert_step_attempt(&pool, "run_1", "github_sync", first_attempt, Some(0), "ok", "", 12)
            .await
            .unwrap();

        let second_attempt = next_attempt_no(&pool, "run_1", "github_sync").await.unwrap();
        assert_eq!(second_attempt, 2);
        insert_step_attempt(&pool, "run_1", "github_sync", second_attempt, Some(1), "", "boom", 5)
            .await
            .unwrap();

        let attempts = list_step_attempts(&pool, "run_1").await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].attempt_no, 1);
        assert_eq!(attempts[0].exit_code, Some(0));
        assert_eq!(attempts[1].attempt_no, 2);
        assert_eq!(attempts[1].stderr, "boom");
    }

    #[tokio::test]
    async fn webhook_delivery_dedup_prevents_double_insert() {
        let pool = setup().await;
        let first = insert_webhook_delivery(&pool, "github", "d1", "push", "abc").await.unwrap();
        let second = insert_webhook_delivery(&pool, "github", "d1", "push", "abc").await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn cleanup_webhook_deliveries_removes_only_stale_rows() {
        let pool = setup().await;
        insert_webhook_delivery(&pool, "github", "old", "push", "abc").await.unwrap();
        insert_webhook_delivery(&pool, "github", "new", "push", "def").await.unwrap();

        let removed = cleanup_webhook_deliveries(&pool, "github", Utc::now() - chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 0);

        let removed = cleanup_webhook_deliveries(&pool, "github", Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 2);

        let reinserted = insert_webhook_delivery(&pool, "github", "old", "push", "abc").await.unwrap();
        assert!(reinserted);
    }
}
