//! Phase orchestration: one invocation, one phase.
//!
//! Each run of the orchestrator handles a single phase:
//! - **Discover**: catalogue candidates become (download, pending) jobs
//! - **Download**: per centre, fetch (or link) originals, then checksum them
//! - **Tile**: images at (checksum, done) go through the [`Tiler`](crate::tiler::Tiler)
//!
//! Retile and reconcile are maintenance runs sharing the tile lock.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::PhaseOrchestrator;
pub use types::{
    DownloadOutcome, DownloadReport, OrchestratorError, ReconcileReport, RetileReport,
    StatusReport, TileReport,
};
