//! Reuse of already-downloaded originals for repeated source URLs.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::job::{JobStore, JobStoreError, MediaJob};
use crate::layout::MediaLayout;

/// What [`Deduplicator::try_link`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// The target now links to another job's original.
    Linked { source_job_id: i64, source: PathBuf },
    /// No earlier job downloaded this URL.
    NoCandidate,
    /// The earlier job's original is no longer on disk.
    SourceMissing { source_job_id: i64, source: PathBuf },
    /// The link could not be created.
    LinkFailed { source_job_id: i64, reason: String },
}

impl DedupOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, DedupOutcome::Linked { .. })
    }
}

pub struct Deduplicator {
    store: Arc<dyn JobStore>,
    layout: MediaLayout,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn JobStore>, layout: MediaLayout) -> Self {
        Self { store, layout }
    }

    /// Links `target` to the newest earlier download of `job.source_url`.
    ///
    /// Anything other than [`DedupOutcome::Linked`] means the caller fetches
    /// over the network. Only store errors are returned as `Err`.
    pub fn try_link(&self, job: &MediaJob, target: &Path) -> Result<DedupOutcome, JobStoreError> {
        let candidate = match self.store.find_latest_successful_by_url(&job.source_url)? {
            Some(c) if c.id != job.id => c,
            _ => return Ok(DedupOutcome::NoCandidate),
        };

        let source = self.layout.original_path(&candidate);
        // Follows link chains, so the new link points at real content.
        let resolved = match source.canonicalize() {
            Ok(path) => path,
            Err(_) => {
                debug!(
                    job_id = job.id,
                    source_job_id = candidate.id,
                    source = %source.display(),
                    "Dedup candidate has no original on disk"
                );
                return Ok(DedupOutcome::SourceMissing {
                    source_job_id: candidate.id,
                    source,
                });
            }
        };

        match link(&resolved, target) {
            Ok(()) => {
                info!(
                    job_id = job.id,
                    source_job_id = candidate.id,
                    source = %resolved.display(),
                    "Linked existing original instead of downloading"
                );
                Ok(DedupOutcome::Linked {
                    source_job_id: candidate.id,
                    source: resolved,
                })
            }
            Err(e) => {
                warn!(
                    job_id = job.id,
                    source_job_id = candidate.id,
                    target = %target.display(),
                    "Failed to link existing original: {}",
                    e
                );
                Ok(DedupOutcome::LinkFailed {
                    source_job_id: candidate.id,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn link(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source, target)
    }
    #[cfg(not(unix))]
    {
        std::fs::hard_link(source, target)
    }
}
