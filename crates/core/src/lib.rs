pub mod config;
pub mod dedup;
pub mod discovery;
pub mod integrity;
pub mod job;
pub mod layout;
pub mod lock;
pub mod orchestrator;
pub mod recovery;
pub mod testing;
pub mod tiler;
pub mod transport;

pub use config::{
    ensure_storage_dirs, load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use dedup::{DedupOutcome, Deduplicator};
pub use discovery::{
    Candidate, CatalogueError, DiscoveryError, DiscoveryReport, SqliteTrackingCatalogue,
    TrackingCatalogue,
};
pub use integrity::{compute_checksum, ChecksumAlgorithm, IntegrityError};
pub use job::{
    Credential, ErrorLogEntry, JobState, JobStatus, JobStore, JobStoreError, MediaContext,
    MediaJob, Phase, SqliteJobStore,
};
pub use layout::MediaLayout;
pub use lock::{FileLockProvider, LockError, LockGuard, LockName, LockProvider};
pub use orchestrator::{
    DownloadReport, OrchestratorConfig, OrchestratorError, PhaseOrchestrator, ReconcileReport,
    RetileReport, StatusReport, TileReport,
};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use tiler::{ScriptTiler, TileError, Tiler, TilingConfig};
pub use transport::{SchemeTransport, Transport, TransportConfig, TransportError};
