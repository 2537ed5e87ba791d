//! Job storage trait and types.

use thiserror::Error;

use super::lifecycle::{JobState, TransitionError};
use super::types::{Credential, ErrorLogEntry, MediaContext, MediaJob, Phase, PhaseStatusCount};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(i64),

    #[error("A job already exists for context {0}")]
    DuplicateContext(MediaContext),

    #[error("Job {job_id} already has checksum {existing}")]
    ChecksumConflict { job_id: i64, existing: String },

    #[error("{0} cannot be stored")]
    InvalidState(JobState),

    #[error("Job {job_id}: {source}")]
    Transition {
        job_id: i64,
        #[source]
        source: TransitionError,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// A job about to be enqueued by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaJob {
    pub context: MediaContext,
    pub source_url: String,
    /// Id from [`JobStore::lookup_or_create_extension`].
    pub extension_id: i64,
    pub is_image: bool,
}

/// Persistent job table acting as work queue and crash checkpoint.
///
/// Every write is committed before the call returns.
pub trait JobStore: Send + Sync {
    /// Insert a new job at `(download, pending)`.
    fn enqueue(&self, job: NewMediaJob) -> Result<MediaJob, JobStoreError>;

    /// Get a job by id.
    fn get(&self, id: i64) -> Result<Option<MediaJob>, JobStoreError>;

    fn find_by_context(&self, context: &MediaContext) -> Result<Option<MediaJob>, JobStoreError>;

    /// Jobs in the given state, optionally limited to one centre, by ascending id.
    fn list_by_phase_status(
        &self,
        state: JobState,
        centre_id: Option<i64>,
    ) -> Result<Vec<MediaJob>, JobStoreError>;

    /// The highest-id job with this URL that has completed its download.
    fn find_latest_successful_by_url(&self, url: &str) -> Result<Option<MediaJob>, JobStoreError>;

    fn set_phase_status(&self, job_id: i64, state: JobState) -> Result<(), JobStoreError>;

    /// Checks `job`'s move to `next` against the lifecycle, then commits it.
    fn transition(&self, job: &MediaJob, next: JobState) -> Result<(), JobStoreError> {
        let next = job
            .state
            .transition(next, job.is_image)
            .map_err(|source| JobStoreError::Transition {
                job_id: job.id,
                source,
            })?;
        self.set_phase_status(job.id, next)
    }

    /// Record the content hash. Setting the same value again is a no-op,
    /// a different value is a [`JobStoreError::ChecksumConflict`].
    fn set_checksum(&self, job_id: i64, checksum: &str) -> Result<(), JobStoreError>;

    fn set_dimensions(&self, job_id: i64, width: u32, height: u32) -> Result<(), JobStoreError>;

    fn append_error(
        &self,
        job_id: i64,
        phase: Phase,
        message: &str,
    ) -> Result<ErrorLogEntry, JobStoreError>;

    /// Error log for a job, oldest first.
    fn list_errors(&self, job_id: i64) -> Result<Vec<ErrorLogEntry>, JobStoreError>;

    fn lookup_or_create_extension(&self, name: &str) -> Result<i64, JobStoreError>;

    fn lookup_credential(&self, centre_id: i64) -> Result<Option<Credential>, JobStoreError>;

    fn lookup_centre_id(&self, short_name: &str) -> Result<Option<i64>, JobStoreError>;

    /// Non-empty (phase, status) buckets.
    fn count_by_phase_status(&self) -> Result<Vec<PhaseStatusCount>, JobStoreError>;
}
