//! Tracking catalogue trait and types.

use std::path::PathBuf;

use thiserror::Error;

use crate::job::MediaContext;

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("Cannot open tracking catalogue {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Tracking catalogue query failed: {0}")]
    Query(String),
}

/// A media file the tracking catalogue knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub context: MediaContext,
    pub url: String,
}

/// Read-only source of candidate (context, URL) pairs.
pub trait TrackingCatalogue: Send + Sync {
    /// Returns the name of this catalogue implementation.
    fn name(&self) -> &str;

    /// Every candidate the catalogue currently lists.
    fn candidates(&self) -> Result<Vec<Candidate>, CatalogueError>;
}
