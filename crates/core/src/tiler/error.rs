//! Error types for the tiler module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while generating tiles.
#[derive(Debug, Error)]
pub enum TileError {
    /// The tile generation script does not exist.
    #[error("Tile script not found at path: {path}")]
    ScriptNotFound { path: PathBuf },

    /// The original to tile is missing.
    #[error("Original not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The script ran and exited non-zero (or was killed by a signal).
    #[error("Tile script failed with exit code {code:?}: {stderr}")]
    ScriptFailed { code: Option<i32>, stderr: String },

    #[error("Tile script timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
