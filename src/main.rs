use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod db;
mod engine;
mod error;
mod grid;
mod lifecycle;
mod mask;
mod orchestrate;
mod pipeline;
mod records;
mod serialize;
mod store;
#[cfg(test)]
mod testutil;
mod trigger;

use db::JsonDb;
use lifecycle::Worker;
use orchestrate::RunOutcome;
use records::InstanceConfig;
use store::DirStore;
use trigger::InProcessTrigger;

/// Append-only failure log next to the data, kept in addition to stderr
/// so unattended runs leave a trace.
const LOG_FILE: &str = "stormgrid_log.txt";

#[derive(Parser)]
#[command(name = "stormgrid")]
#[command(about = "Flood-depth accumulation worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim one pending job, run the accumulation, and finalize it.
    Run {
        /// Data root holding instance.json, the db/ collections and the
        /// objects/ store.
        #[arg(long)]
        root: PathBuf,
    },

    /// Run the accumulation pipeline for an already-staged job.
    Process {
        #[arg(long)]
        root: PathBuf,

        /// Job identifier (hex).
        job: String,
    },
}

impl Commands {
    fn root(&self) -> &Path {
        match self {
            Commands::Run { root } | Commands::Process { root, .. } => root,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let root = cli.cmd.root().to_path_buf();

    // Exit contract: 0 on success, 1 on any uncaught failure, no
    // per-kind codes.
    if let Err(err) = run(cli.cmd) {
        tracing::error!("{err:#}");
        append_log(&root, &format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Run { root } => {
            let instance = load_instance(&root)?;
            let db = JsonDb::new(root.join("db"));
            let object_store = DirStore::new(root.join("objects"));
            let worker = Worker::new(
                &instance.instance_id,
                &instance.model_type,
                &db,
                &object_store,
            );
            let trigger = InProcessTrigger::new(&object_store);

            match orchestrate::run_once(&worker, &trigger)? {
                RunOutcome::NoJob => tracing::info!("nothing to do"),
                RunOutcome::Finished { job, aggregate } => {
                    tracing::info!(%job, %aggregate, "job finished successfully")
                }
            }
        }

        Commands::Process { root, job } => {
            let job_id = uuid::Uuid::parse_str(&job)
                .with_context(|| format!("'{job}' is not a valid job identifier"))?;
            let object_store = DirStore::new(root.join("objects"));
            let summary = pipeline::process_job(&object_store, job_id)?;
            tracing::info!(
                observations = summary.observations,
                applied = summary.applied,
                emitted = summary.records_emitted,
                "results have been saved"
            );
        }
    }

    Ok(())
}

fn load_instance(root: &Path) -> anyhow::Result<InstanceConfig> {
    let path = root.join("instance.json");
    let raw =
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn append_log(root: &Path, message: &str) {
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join(LOG_FILE))
        .and_then(|mut file| writeln!(file, "{message}"));
    if result.is_err() {
        eprintln!("no log file could be written at {}", root.display());
    }
}
