//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fetch, checksum and tile media referenced by the tracking catalogue.
#[derive(Debug, Parser)]
#[command(name = "mediafetch", version, about)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, env = "MEDIAFETCH_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Directory for the phase lock files. Overrides `[lock] dir`.
    #[arg(long, global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Log at debug level. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enqueue download jobs for new catalogue entries.
    Discover,

    /// Download and checksum the pending jobs of one centre.
    Download {
        /// Centre id or short name.
        #[arg(long)]
        centre: String,

        /// Put the centre's failed downloads back to pending first.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Generate tiles for checksummed images.
    Tile,

    /// Drop the tiles of failed tile jobs and generate them again.
    Retile {
        /// Also redo jobs whose tiles were generated successfully.
        #[arg(long)]
        include_done: bool,
    },

    /// Mark failed tile jobs done when their tiles on disk are usable.
    Reconcile,

    /// Show job counts per phase and status.
    Status {
        #[arg(long)]
        json: bool,

        /// Show one job and its error log instead.
        #[arg(long, value_name = "JOB_ID")]
        errors: Option<i64>,
    },
}
