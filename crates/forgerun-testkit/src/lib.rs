//! Fixture helpers shared by the core crates' integration tests: a
//! deterministic clock, an in-memory storage engine factory, a temp-file
//! audit writer factory, and a builder for seeding runs.

use std::cell::Cell;

use anyhow::Result;
use chrono::{DateTime, Utc};
use forgerun_audit::AuditWriter;
use forgerun_schemas::{Clock, RunMode};
use serde_json::{json, Value};
use sqlx::SqlitePool;

/// A [`Clock`] whose `now()` is set by the test, not the wall clock. Not
/// `Send`-shared across threads (`Cell`, not `Mutex`) since fixtures are
/// built and used within a single test's async task.
#[derive(Debug)]
pub struct FakeClock {
    now: Cell<DateTime<Utc>>,
}

impl FakeClock {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self { now: Cell::new(ts) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.now.set(self.now.get() + delta);
    }

    pub fn set(&self, ts: DateTime<Utc>) {
        self.now.set(ts);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// An in-memory, already-migrated SQLite pool. Each call gets a fresh,
/// isolated database.
pub async fn in_memory_pool() -> Result<SqlitePool> {
    let pool = forgerun_store::connect("sqlite::memory:").await?;
    forgerun_store::migrate(&pool).await?;
    Ok(pool)
}

/// An [`AuditWriter`] backed by a throwaway temp directory. The directory is
/// returned alongside the writer so the caller can keep it alive for the
/// duration of the test (it deletes its contents on drop).
pub fn temp_audit_writer(hash_chain: bool) -> Result<(AuditWriter, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let writer = AuditWriter::new(dir.path().join("audit.jsonl"), hash_chain)?;
    Ok((writer, dir))
}

/// A minimal, valid [`forgerun_store::NewRun`] for `owner/repo`, with
/// sensible filler for the fields a given test doesn't care about.
pub fn new_run_fixture(run_id: &str, owner: &str, repo: &str) -> forgerun_store::NewRun {
    forgerun_store::NewRun {
        run_id: run_id.to_string(),
        owner: owner.to_string(),
        repo: repo.to_string(),
        prompt_version: "v1".to_string(),
        mode: RunMode::PushOnly,
        budget: json!({}),
        workspace_dir: format!("/tmp/forgerun-testkit/{run_id}"),
    }
}

/// Seeds a run via [`new_run_fixture`] and inserts it, returning its id.
pub async fn seed_run(pool: &SqlitePool, owner: &str, repo: &str) -> Result<String> {
    let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
    forgerun_store::insert_run(pool, &new_run_fixture(&run_id, owner, repo)).await?;
    Ok(run_id)
}

/// Builds a minimal GitHub PR-view JSON payload the shape
/// `forgerun_hosting::GithubClient::fetch_pull_request_view` returns, for
/// feeding `forgerun_sync` tests without a real hosting client.
pub fn pr_view_json(review_decision: Option<&str>, check_conclusions: &[&str], review_states: &[&str]) -> Value {
    json!({
        "number": 1,
        "reviewDecision": review_decision,
        "statusCheckRollup": check_conclusions.iter().map(|c| json!({"conclusion": c})).collect::<Vec<_>>(),
        "reviews": review_states.iter().map(|s| json!({"state": s})).collect::<Vec<_>>(),
    })
}
