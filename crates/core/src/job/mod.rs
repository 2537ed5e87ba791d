//! Media jobs: the persisted work queue and its phase/status lifecycle.

mod lifecycle;
mod sqlite_store;
mod store;
mod types;

pub use lifecycle::{JobState, TransitionError};
pub use sqlite_store::SqliteJobStore;
pub use store::{JobStore, JobStoreError, NewMediaJob};
pub use types::{
    Credential, ErrorLogEntry, JobStatus, MediaContext, MediaJob, Phase, PhaseStatusCount,
};
