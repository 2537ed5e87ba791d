//! The (phase, status) state machine.
//!
//! Forward path:
//!
//! ```text
//! (download, pending) -> (download, running) -> (checksum, pending)
//!     -> (checksum, running) -> (checksum, done) -> (tile, running) -> (tile, done)
//! ```
//!
//! Failures branch off into `(download, failed)`, `(checksum, failed)` and
//! `(tile, failed)`. Recovery rewinds `running` states to a restart point.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{JobStatus, Phase};

/// Errors raised when a state change is not part of the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobState, to: JobState },

    #[error("only image jobs can enter the tile phase (from {from})")]
    NotAnImage { from: JobState },

    #[error("{0} is not a valid job state")]
    InvalidState(JobState),
}

/// A (phase, status) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobState {
    pub phase: Phase,
    pub status: JobStatus,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.phase, self.status)
    }
}

impl JobState {
    pub const DOWNLOAD_PENDING: JobState = JobState::new(Phase::Download, JobStatus::Pending);
    pub const DOWNLOAD_RUNNING: JobState = JobState::new(Phase::Download, JobStatus::Running);
    /// Only produced by older writers; recovery rewinds it.
    pub const DOWNLOAD_DONE: JobState = JobState::new(Phase::Download, JobStatus::Done);
    pub const DOWNLOAD_FAILED: JobState = JobState::new(Phase::Download, JobStatus::Failed);
    pub const CHECKSUM_PENDING: JobState = JobState::new(Phase::Checksum, JobStatus::Pending);
    pub const CHECKSUM_RUNNING: JobState = JobState::new(Phase::Checksum, JobStatus::Running);
    pub const CHECKSUM_DONE: JobState = JobState::new(Phase::Checksum, JobStatus::Done);
    pub const CHECKSUM_FAILED: JobState = JobState::new(Phase::Checksum, JobStatus::Failed);
    pub const TILE_RUNNING: JobState = JobState::new(Phase::Tile, JobStatus::Running);
    pub const TILE_DONE: JobState = JobState::new(Phase::Tile, JobStatus::Done);
    pub const TILE_FAILED: JobState = JobState::new(Phase::Tile, JobStatus::Failed);

    pub const fn new(phase: Phase, status: JobStatus) -> Self {
        Self { phase, status }
    }

    /// Whether this pair may be stored at all. Tile work is claimed straight
    /// from `(checksum, done)`, so `(tile, pending)` never exists.
    pub fn is_valid(&self) -> bool {
        !(self.phase == Phase::Tile && self.status == JobStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// True once the download has completed and been committed.
    pub fn has_downloaded(&self) -> bool {
        self.phase != Phase::Download || self.status == JobStatus::Done
    }

    /// States no phase run will move a job out of on its own.
    pub fn is_terminal(&self, is_image: bool) -> bool {
        match (self.phase, self.status) {
            (Phase::Checksum, JobStatus::Done) => !is_image,
            (_, JobStatus::Failed) => true,
            (Phase::Tile, JobStatus::Done) => true,
            _ => false,
        }
    }

    /// Whether `next` is reachable from `self` in one step.
    ///
    /// Besides the forward path this admits the rewinds performed by
    /// recovery, the failed-download retry, and the retile/reconcile
    /// maintenance actions.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState as S;

        matches!(
            (*self, next),
            (S::DOWNLOAD_PENDING, S::DOWNLOAD_RUNNING)
                | (S::DOWNLOAD_RUNNING, S::CHECKSUM_PENDING)
                | (S::DOWNLOAD_RUNNING, S::DOWNLOAD_FAILED)
                | (S::DOWNLOAD_RUNNING, S::DOWNLOAD_PENDING)
                | (S::DOWNLOAD_DONE, S::DOWNLOAD_PENDING)
                | (S::DOWNLOAD_FAILED, S::DOWNLOAD_PENDING)
                | (S::CHECKSUM_PENDING, S::CHECKSUM_RUNNING)
                | (S::CHECKSUM_RUNNING, S::CHECKSUM_DONE)
                | (S::CHECKSUM_RUNNING, S::CHECKSUM_FAILED)
                | (S::CHECKSUM_RUNNING, S::DOWNLOAD_PENDING)
                | (S::CHECKSUM_DONE, S::TILE_RUNNING)
                | (S::TILE_RUNNING, S::TILE_DONE)
                | (S::TILE_RUNNING, S::TILE_FAILED)
                | (S::TILE_RUNNING, S::CHECKSUM_DONE)
                | (S::TILE_FAILED, S::CHECKSUM_DONE)
                | (S::TILE_FAILED, S::TILE_DONE)
                | (S::TILE_DONE, S::CHECKSUM_DONE)
        )
    }

    /// Checks a transition for a job and returns the new state.
    pub fn transition(self, next: JobState, is_image: bool) -> Result<JobState, TransitionError> {
        if !next.is_valid() {
            return Err(TransitionError::InvalidState(next));
        }
        if next.phase == Phase::Tile && !is_image {
            return Err(TransitionError::NotAnImage { from: self });
        }
        if !self.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<JobState> {
        Phase::ALL
            .iter()
            .flat_map(|p| JobStatus::ALL.iter().map(move |s| JobState::new(*p, *s)))
            .collect()
    }

    #[test]
    fn test_forward_path_for_image() {
        let path = [
            JobState::DOWNLOAD_PENDING,
            JobState::DOWNLOAD_RUNNING,
            JobState::CHECKSUM_PENDING,
            JobState::CHECKSUM_RUNNING,
            JobState::CHECKSUM_DONE,
            JobState::TILE_RUNNING,
            JobState::TILE_DONE,
        ];
        for pair in path.windows(2) {
            assert_eq!(pair[0].transition(pair[1], true), Ok(pair[1]));
        }
    }

    #[test]
    fn test_non_image_cannot_enter_tile() {
        let err = JobState::CHECKSUM_DONE
            .transition(JobState::TILE_RUNNING, false)
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotAnImage { .. }));
    }

    #[test]
    fn test_tile_pending_is_never_valid() {
        let tile_pending = JobState::new(Phase::Tile, JobStatus::Pending);
        assert!(!tile_pending.is_valid());
        for from in all_states() {
            assert!(!from.can_transition_to(tile_pending));
        }
        assert_eq!(
            JobState::CHECKSUM_DONE.transition(tile_pending, true),
            Err(TransitionError::InvalidState(tile_pending))
        );
    }

    #[test]
    fn test_checksum_failure_needs_operator() {
        for next in all_states() {
            assert!(!JobState::CHECKSUM_FAILED.can_transition_to(next));
        }
        assert!(JobState::CHECKSUM_FAILED.is_terminal(false));
        assert!(JobState::CHECKSUM_FAILED.is_terminal(true));
    }

    #[test]
    fn test_download_failure_is_retryable() {
        assert!(JobState::DOWNLOAD_FAILED.can_transition_to(JobState::DOWNLOAD_PENDING));
        assert!(JobState::DOWNLOAD_FAILED.is_terminal(false));
    }

    #[test]
    fn test_recovery_rewinds_are_legal() {
        assert!(JobState::DOWNLOAD_RUNNING.can_transition_to(JobState::DOWNLOAD_PENDING));
        assert!(JobState::CHECKSUM_RUNNING.can_transition_to(JobState::DOWNLOAD_PENDING));
        assert!(JobState::DOWNLOAD_DONE.can_transition_to(JobState::DOWNLOAD_PENDING));
        assert!(JobState::TILE_RUNNING.can_transition_to(JobState::CHECKSUM_DONE));
    }

    #[test]
    fn test_cannot_skip_phases() {
        assert!(!JobState::DOWNLOAD_PENDING.can_transition_to(JobState::CHECKSUM_PENDING));
        assert!(!JobState::DOWNLOAD_PENDING.can_transition_to(JobState::CHECKSUM_DONE));
        assert!(!JobState::CHECKSUM_PENDING.can_transition_to(JobState::TILE_RUNNING));
        assert!(!JobState::DOWNLOAD_RUNNING.can_transition_to(JobState::TILE_RUNNING));
    }

    #[test]
    fn test_checksum_done_is_pickup_point_for_images_only() {
        assert!(JobState::CHECKSUM_DONE.is_terminal(false));
        assert!(!JobState::CHECKSUM_DONE.is_terminal(true));
    }

    #[test]
    fn test_has_downloaded() {
        assert!(!JobState::DOWNLOAD_PENDING.has_downloaded());
        assert!(!JobState::DOWNLOAD_RUNNING.has_downloaded());
        assert!(!JobState::DOWNLOAD_FAILED.has_downloaded());
        assert!(JobState::DOWNLOAD_DONE.has_downloaded());
        assert!(JobState::CHECKSUM_PENDING.has_downloaded());
        assert!(JobState::TILE_FAILED.has_downloaded());
    }

    #[test]
    fn test_display() {
        assert_eq!(JobState::TILE_RUNNING.to_string(), "(tile, running)");
    }
}
