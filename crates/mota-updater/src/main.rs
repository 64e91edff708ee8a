//! mota-updater: run one OTA update attempt for the program in a directory.
//!
//! Exit codes: 0 when no update was needed, the configured restart code
//! after a successful install, 1 on failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mota_updater::{
    read_declared_version, ArtifactSource, FsStore, HttpTransport, LiteralVersionProbe,
    UpdateConfig, UpdateOrchestrator, UpdateOutcome,
};

#[derive(Parser)]
#[command(name = "mota-updater")]
#[command(about = "Fetch, validate and install a new version of the device program")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "MOTA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the live program and the temp download
    #[arg(short, long, env = "MOTA_ROOT", default_value = ".")]
    root: PathBuf,

    /// URL of the new program
    #[arg(short, long, env = "MOTA_URL")]
    url: String,

    /// Version the server reports for the new program
    #[arg(short, long, env = "MOTA_TARGET_VERSION")]
    target_version: String,

    /// Running version; read from the live program when omitted
    #[arg(long, env = "MOTA_CURRENT_VERSION")]
    current_version: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the outcome as a JSON object on stdout
    #[arg(long)]
    report_json: bool,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mota_updater={}", args.log_level)));

    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn report(outcome: &UpdateOutcome) -> serde_json::Value {
    match outcome {
        UpdateOutcome::NoUpdateNeeded => json!({ "outcome": "no_update_needed" }),
        UpdateOutcome::UpdateInstalled { version } => json!({
            "outcome": "update_installed",
            "version": version,
            "restart_required": true,
        }),
        UpdateOutcome::UpdateFailed { stage, error } => json!({
            "outcome": "update_failed",
            "stage": stage,
            "error": error.to_string(),
            "retryable": error.is_recoverable_by_retry(),
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = match &args.config {
        Some(path) => UpdateConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => UpdateConfig::default(),
    };

    if !args.root.is_dir() {
        bail!("store directory {} does not exist", args.root.display());
    }
    let store = Arc::new(FsStore::new(&args.root));

    let current_version = match &args.current_version {
        Some(version) => version.clone(),
        None => read_declared_version(
            &*store,
            &config.live_name,
            config.max_size,
            &LiteralVersionProbe,
        )
        .with_context(|| {
            format!(
                "cannot determine the running version from {}; pass --current-version",
                config.live_name
            )
        })?,
    };

    let transport = Arc::new(HttpTransport::new(&config.network)?);
    let mut orchestrator = UpdateOrchestrator::from_config(&config, transport, store)?;

    let source = ArtifactSource::new(args.url.as_str(), args.target_version.as_str());
    let outcome = orchestrator.run(&current_version, &source).await;

    if args.report_json {
        println!("{}", report(&outcome));
    }

    match outcome {
        UpdateOutcome::NoUpdateNeeded => {
            info!("Already up to date ({})", current_version);
            Ok(())
        }
        UpdateOutcome::UpdateInstalled { version } => {
            info!(
                "Installed {}, restarting in {} ms",
                version, config.restart.grace_delay_ms
            );
            tokio::time::sleep(Duration::from_millis(config.restart.grace_delay_ms)).await;
            std::process::exit(config.restart.exit_code);
        }
        UpdateOutcome::UpdateFailed { stage, error } => {
            if error.is_recoverable_by_retry() {
                warn!("Update may succeed if retried later");
            }
            Err(anyhow::Error::new(error).context(format!("update failed during {}", stage)))
        }
    }
}
