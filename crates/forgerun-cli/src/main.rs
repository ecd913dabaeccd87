use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

mod commands;

use commands::{gate, run, sync};

#[derive(Parser)]
#[command(name = "forgerun")]
#[command(about = "forgerun run orchestrator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Trigger an on-demand synchronization pass for one run
    Sync {
        #[arg(long = "run-id")]
        run_id: String,
        #[arg(long = "audit-log", default_value = "forgerun-audit.jsonl")]
        audit_log: String,
    },

    /// Evaluate PR gate readiness for one run
    Gate {
        #[arg(long = "run-id")]
        run_id: String,
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum RunCmd {
    /// Create a new run row and print its run_id.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// Run mode (push-only)
        #[arg(long, default_value = "push-only")]
        mode: String,
        #[arg(long, default_value = "v1")]
        prompt_version: String,
        /// Inline JSON budget object
        #[arg(long, default_value = "{}")]
        budget: String,
    },

    /// Apply one lifecycle event to a run.
    ApplyEvent {
        #[arg(long = "run-id")]
        run_id: String,
        #[arg(long = "event")]
        event_type: String,
        #[arg(long)]
        payload: Option<String>,
        #[arg(long = "payload-file")]
        payload_file: Option<String>,
        #[arg(long = "idempotency-key")]
        idempotency_key: Option<String>,
        #[arg(long = "audit-log", default_value = "forgerun-audit.jsonl")]
        audit_log: String,
    },

    /// Print a single run's current snapshot.
    Snapshot {
        #[arg(long = "run-id")]
        run_id: String,
    },

    /// List recent runs.
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// List a run's stored artifacts.
    Artifacts {
        #[arg(long = "run-id")]
        run_id: String,
    },

    /// List a run's recorded step attempts.
    StepAttempts {
        #[arg(long = "run-id")]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = forgerun_store::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = forgerun_store::status(&pool).await?;
                    println!("db_ok={} has_runs_table={}", s.ok, s.has_runs_table);
                }
                DbCmd::Migrate => {
                    forgerun_store::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let loaded = forgerun_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Run { cmd } => match cmd {
            RunCmd::Create { owner, repo, mode, prompt_version, budget } => {
                let budget: Value = serde_json::from_str(&budget)?;
                run::run_create(owner, repo, mode, prompt_version, budget).await?;
            }
            RunCmd::ApplyEvent { run_id, event_type, payload, payload_file, idempotency_key, audit_log } => {
                run::run_apply_event(run_id, event_type, payload, payload_file, idempotency_key, audit_log).await?;
            }
            RunCmd::Snapshot { run_id } => run::run_snapshot(run_id).await?,
            RunCmd::List { limit } => run::run_list(limit).await?,
            RunCmd::Artifacts { run_id } => run::run_artifacts(run_id).await?,
            RunCmd::StepAttempts { run_id } => run::run_step_attempts(run_id).await?,
        },

        Commands::Sync { run_id, audit_log } => sync::sync_run(run_id, audit_log).await?,

        Commands::Gate { run_id, config_paths } => gate::gate_evaluate(run_id, config_paths).await?,
    }

    Ok(())
}
