//! Types for the phase orchestrator.

use serde::Serialize;
use thiserror::Error;

use crate::job::{JobState, PhaseStatusCount};
use crate::recovery::RecoveryReport;

/// Errors that abort a phase run.
///
/// Per-job failures (a transfer that gives up, an unreadable original, a
/// failing tile script) never show up here; they end in a failed job state
/// and an error log entry, and the run carries on.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Another run of the same phase holds the lock.
    #[error("lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] crate::job::JobStoreError),

    /// Tracking catalogue or enqueue failure during discovery.
    #[error("discovery error: {0}")]
    Discovery(#[from] crate::discovery::DiscoveryError),

    /// Settings that only turn out unusable when a run starts.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A centre short name with no entry in the centre registry.
    #[error("unknown centre: {0}")]
    UnknownCentre(String),
}

impl OrchestratorError {
    /// Whether the run did nothing because another run owns the lock.
    pub fn is_contended(&self) -> bool {
        matches!(self, OrchestratorError::Lock(crate::lock::LockError::Contended { .. }))
    }
}

/// How the download step got a job's original onto disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A complete file was already at the target path.
    AlreadyPresent,
    /// Linked to the original of an earlier job with the same URL.
    Linked { source_job_id: i64 },
    Fetched { bytes: u64, attempts: u32, anonymous: bool },
    /// The job is now (download, failed).
    Failed,
}

/// Tally of one download run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub centre_id: i64,
    pub recovery: RecoveryReport,
    /// Failed downloads put back to pending by `--retry-failed`.
    pub retried: usize,
    pub fetched: usize,
    pub linked: usize,
    pub already_present: usize,
    pub failed: usize,
    pub checksummed: usize,
    pub checksum_failed: usize,
}

impl DownloadReport {
    pub(crate) fn record_download(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::AlreadyPresent => self.already_present += 1,
            DownloadOutcome::Linked { .. } => self.linked += 1,
            DownloadOutcome::Fetched { .. } => self.fetched += 1,
            DownloadOutcome::Failed => self.failed += 1,
        }
    }

    pub(crate) fn record_checksum(&mut self, state: JobState) {
        if state == JobState::CHECKSUM_DONE {
            self.checksummed += 1;
        } else {
            self.checksum_failed += 1;
        }
    }
}

/// Tally of one tile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileReport {
    pub recovery: RecoveryReport,
    pub tiled: usize,
    pub failed: usize,
}

/// Tally of one retile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetileReport {
    /// Jobs rewound to (checksum, done).
    pub reset: usize,
    pub trees_removed: usize,
    /// Finished jobs among `reset` that shared a removed tree.
    pub shared_rewound: usize,
    pub tile: TileReport,
}

/// Tally of one reconcile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub repaired: usize,
    pub unrecoverable: usize,
}

/// Job counts per (phase, status).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub counts: Vec<PhaseStatusCount>,
    pub total: u64,
}

impl StatusReport {
    pub fn new(counts: Vec<PhaseStatusCount>) -> Self {
        let total = counts.iter().map(|c| c.count).sum();
        Self { counts, total }
    }

    pub fn count(&self, state: JobState) -> u64 {
        self.counts
            .iter()
            .find(|c| c.state == state)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockError;

    #[test]
    fn test_orchestrator_error_display() {
        let err = OrchestratorError::UnknownCentre("xyz".to_string());
        assert_eq!(err.to_string(), "unknown centre: xyz");

        let err = OrchestratorError::Lock(LockError::Contended {
            name: "tile".to_string(),
        });
        assert!(err.to_string().contains("tile"));
    }

    #[test]
    fn test_is_contended() {
        let contended = OrchestratorError::from(LockError::Contended {
            name: "discover".to_string(),
        });
        assert!(contended.is_contended());

        let io = OrchestratorError::from(LockError::Io {
            path: "/run/x.lock".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert!(!io.is_contended());
        assert!(!OrchestratorError::UnknownCentre("x".to_string()).is_contended());
    }

    #[test]
    fn test_download_report_tally() {
        let mut report = DownloadReport::default();
        report.record_download(&DownloadOutcome::Linked { source_job_id: 3 });
        report.record_download(&DownloadOutcome::Failed);
        report.record_download(&DownloadOutcome::Fetched {
            bytes: 10,
            attempts: 2,
            anonymous: false,
        });
        report.record_checksum(JobState::CHECKSUM_DONE);
        report.record_checksum(JobState::CHECKSUM_FAILED);

        assert_eq!(report.linked, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.checksummed, 1);
        assert_eq!(report.checksum_failed, 1);
    }

    #[test]
    fn test_status_report_counts() {
        let report = StatusReport::new(vec![
            PhaseStatusCount {
                state: JobState::DOWNLOAD_PENDING,
                count: 4,
            },
            PhaseStatusCount {
                state: JobState::TILE_DONE,
                count: 2,
            },
        ]);
        assert_eq!(report.total, 6);
        assert_eq!(report.count(JobState::TILE_DONE), 2);
        assert_eq!(report.count(JobState::TILE_FAILED), 0);
    }
}
