mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediafetch_core::{
    ensure_storage_dirs, load_config, validate_config, Config, FileLockProvider, JobStore,
    MediaLayout, OrchestratorConfig, OrchestratorError, PhaseOrchestrator,
    SchemeTransport, ScriptTiler, SqliteJobStore, SqliteTrackingCatalogue, StatusReport,
};

use cli::{Cli, Command};

/// Exit code for a run that found its phase lock taken.
const EXIT_CONTENDED: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        if is_contended(&e) {
            warn!("{:#}", e);
            std::process::exit(EXIT_CONTENDED);
        }
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `status` output can be piped.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn is_contended(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<OrchestratorError>()
        .is_some_and(OrchestratorError::is_contended)
}

async fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {:?}", cli.config);
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(dir) = cli.lock_dir {
        config.lock.dir = dir;
    }

    validate_config(&config).context("Configuration validation failed")?;
    ensure_storage_dirs(&config).context("Storage directories are not usable")?;
    info!("Database path: {:?}", config.database.path);

    let orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Command::Discover => {
            let catalogue =
                SqliteTrackingCatalogue::open(&config.tracker.path, config.tracker.query.clone())
                    .context("Failed to open tracking catalogue")?;
            let report = orchestrator.run_discover(Arc::new(catalogue)).await?;
            info!(enqueued = report.enqueued, "Discover complete");
        }
        Command::Download {
            centre,
            retry_failed,
        } => {
            let centre_id = orchestrator.resolve_centre(&centre)?;
            let report = orchestrator.run_download(centre_id, retry_failed).await?;
            info!(centre_id, failed = report.failed, "Download complete");
        }
        Command::Tile => {
            let report = orchestrator.run_tile().await?;
            info!(tiled = report.tiled, failed = report.failed, "Tile complete");
        }
        Command::Retile { include_done } => {
            let report = orchestrator.run_retile(include_done).await?;
            info!(reset = report.reset, tiled = report.tile.tiled, "Retile complete");
        }
        Command::Reconcile => {
            let report = orchestrator.run_reconcile().await?;
            info!(repaired = report.repaired, "Reconcile complete");
        }
        Command::Status { json, errors: Some(job_id) } => {
            let (job, errors) = orchestrator.job_errors(job_id)?;
            if json {
                let value = serde_json::json!({ "job": job, "errors": errors });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("job {} {} {}", job.id, job.state, job.source_url);
                for entry in errors {
                    println!(
                        "{}  {:<8}  {}",
                        entry.created_at.to_rfc3339(),
                        entry.phase.as_str(),
                        entry.message
                    );
                }
            }
        }
        Command::Status { json, errors: None } => {
            let report = orchestrator.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_status(&report));
            }
        }
    }

    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<PhaseOrchestrator> {
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to open job store")?,
    );
    let transport = Arc::new(
        SchemeTransport::from_config(&config.transport).context("Failed to create transports")?,
    );
    let tiler = Arc::new(ScriptTiler::new(&config.tiling));
    let locks = Arc::new(FileLockProvider::new(&config.lock.dir));

    Ok(PhaseOrchestrator::new(
        OrchestratorConfig::from_config(config),
        MediaLayout::from_config(&config.storage),
        store,
        transport,
        tiler,
        locks,
    ))
}

fn render_status(report: &StatusReport) -> String {
    let mut out = format!("{:<10}{:<10}{:>8}\n", "phase", "status", "count");
    for count in &report.counts {
        out.push_str(&format!(
            "{:<10}{:<10}{:>8}\n",
            count.state.phase.as_str(),
            count.state.status.as_str(),
            count.count
        ));
    }
    out.push_str(&format!("{:<20}{:>8}\n", "total", report.total));
    out
}
