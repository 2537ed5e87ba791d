//! Phase runners.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::OrchestratorConfig;
use super::types::{
    DownloadOutcome, DownloadReport, OrchestratorError, ReconcileReport, RetileReport,
    StatusReport, TileReport,
};
use crate::config::ConfigError;
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::discovery::{
    DiscoveryReport, Enumerator, ImageClassifier, InternalUrlFilter, TrackingCatalogue,
};
use crate::integrity::compute_checksum;
use crate::job::{
    Credential, ErrorLogEntry, JobState, JobStore, JobStoreError, MediaJob, Phase,
};
use crate::layout::MediaLayout;
use crate::lock::{LockName, LockProvider};
use crate::recovery::{remove_tree, rewind_tile_sharers, RecoveryManager};
use crate::tiler::{recover_image_size, TileRequest, Tiler};
use crate::transport::{FetchRequest, Transport};

/// Drives jobs through one phase per call.
///
/// Every `run_*` method takes its phase lock before touching the store and
/// holds it until it returns. Jobs are handled one at a time in ascending id
/// order, each transition committed before the next job starts.
pub struct PhaseOrchestrator {
    config: OrchestratorConfig,
    layout: MediaLayout,
    store: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    tiler: Arc<dyn Tiler>,
    locks: Arc<dyn LockProvider>,
    recovery: RecoveryManager,
    dedup: Deduplicator,
}

impl PhaseOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        layout: MediaLayout,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn Transport>,
        tiler: Arc<dyn Tiler>,
        locks: Arc<dyn LockProvider>,
    ) -> Self {
        let recovery = RecoveryManager::new(
            Arc::clone(&store),
            layout.clone(),
            config.preserve_partial_files,
        );
        let dedup = Deduplicator::new(Arc::clone(&store), layout.clone());
        Self {
            config,
            layout,
            store,
            transport,
            tiler,
            locks,
            recovery,
            dedup,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Enqueue a download job for every new candidate in the catalogue.
    #[instrument(name = "discover", skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run_discover(
        &self,
        catalogue: Arc<dyn TrackingCatalogue>,
    ) -> Result<DiscoveryReport, OrchestratorError> {
        let _lock = self.locks.try_acquire(LockName::Discover)?;

        let classifier = ImageClassifier::new(&self.config.image_extensions);
        let internal = InternalUrlFilter::new(&self.config.internal_url_patterns)
            .map_err(|e| {
                ConfigError::ValidationError(format!("invalid internal_url_patterns: {}", e))
            })?;

        let enumerator =
            Enumerator::new(Arc::clone(&self.store), catalogue, classifier, internal);
        Ok(enumerator.run()?)
    }

    /// Download and checksum every pending job of one centre.
    ///
    /// Recovery for the centre runs first. With `retry_failed`, the centre's
    /// failed downloads are put back to pending before the pass.
    #[instrument(name = "download", skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn run_download(
        &self,
        centre_id: i64,
        retry_failed: bool,
    ) -> Result<DownloadReport, OrchestratorError> {
        let _lock = self.locks.try_acquire(LockName::Download { centre_id })?;

        let mut report = DownloadReport {
            centre_id,
            recovery: self.recovery.recover_downloads(Some(centre_id))?,
            ..Default::default()
        };

        if retry_failed {
            for job in self
                .store
                .list_by_phase_status(JobState::DOWNLOAD_FAILED, Some(centre_id))?
            {
                self.store.transition(&job, JobState::DOWNLOAD_PENDING)?;
                debug!(job_id = job.id, "Retrying failed download");
                report.retried += 1;
            }
        }

        // Downloaded by an earlier run that stopped before the checksum step.
        for job in self
            .store
            .list_by_phase_status(JobState::CHECKSUM_PENDING, Some(centre_id))?
        {
            let job = self.checksum_job(job).await?;
            report.record_checksum(job.state);
        }

        let credential = self.store.lookup_credential(centre_id)?;
        let pending = self
            .store
            .list_by_phase_status(JobState::DOWNLOAD_PENDING, Some(centre_id))?;
        info!(
            pending = pending.len(),
            has_credential = credential.is_some(),
            transport = self.transport.name(),
            "Starting downloads"
        );

        for job in pending {
            let (job, outcome) = self.download_job(job, credential.as_ref()).await?;
            report.record_download(&outcome);
            if job.state == JobState::CHECKSUM_PENDING {
                let job = self.checksum_job(job).await?;
                report.record_checksum(job.state);
            }
        }

        info!(
            fetched = report.fetched,
            linked = report.linked,
            already_present = report.already_present,
            failed = report.failed,
            checksummed = report.checksummed,
            checksum_failed = report.checksum_failed,
            "Download run finished"
        );
        Ok(report)
    }

    /// Generate tiles for every image at (checksum, done).
    #[instrument(name = "tile", skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run_tile(&self) -> Result<TileReport, OrchestratorError> {
        let _lock = self.locks.try_acquire(LockName::Tile)?;

        let recovery = self.recovery.recover_tiles()?;
        let mut report = self.tile_pending().await?;
        report.recovery = recovery;
        Ok(report)
    }

    /// Throw away the tiles of failed (and with `include_done`, finished)
    /// tile jobs, then tile them again.
    #[instrument(name = "retile", skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn run_retile(&self, include_done: bool) -> Result<RetileReport, OrchestratorError> {
        let _lock = self.locks.try_acquire(LockName::Tile)?;

        let recovery = self.recovery.recover_tiles()?;
        let mut report = RetileReport::default();

        let mut states = vec![JobState::TILE_FAILED];
        if include_done {
            states.push(JobState::TILE_DONE);
        }
        let mut removed = HashSet::new();
        for state in states {
            for job in self.store.list_by_phase_status(state, None)? {
                if let Some(checksum) = job.checksum.as_deref().filter(|c| !c.is_empty()) {
                    if remove_tree(&self.layout.tile_root(checksum), job.id) {
                        report.trees_removed += 1;
                    }
                    removed.insert(checksum.to_string());
                }
                self.store.transition(&job, JobState::CHECKSUM_DONE)?;
                debug!(job_id = job.id, from = %state, "Queued for retiling");
                report.reset += 1;
            }
        }
        // Finished jobs with the same content lost their tiles too.
        report.shared_rewound = rewind_tile_sharers(self.store.as_ref(), &removed)?;
        report.reset += report.shared_rewound;
        info!(reset = report.reset, trees_removed = report.trees_removed, "Retile reset finished");

        report.tile = self.tile_pending().await?;
        report.tile.recovery = recovery;
        Ok(report)
    }

    /// Mark failed tile jobs done when their tiles on disk give the image
    /// size away after all.
    #[instrument(name = "reconcile", skip_all, fields(run_id = %Uuid::new_v4()))]
    pub async fn run_reconcile(&self) -> Result<ReconcileReport, OrchestratorError> {
        let _lock = self.locks.try_acquire(LockName::Tile)?;

        let mut report = ReconcileReport::default();
        for job in self.store.list_by_phase_status(JobState::TILE_FAILED, None)? {
            report.examined += 1;

            let size = job
                .checksum
                .as_deref()
                .filter(|c| !c.is_empty())
                .and_then(|c| recover_image_size(&self.layout.tile_root(c), self.config.tile_size));
            let Some(size) = size else {
                debug!(job_id = job.id, "No recoverable size on disk");
                report.unrecoverable += 1;
                continue;
            };

            self.store.set_dimensions(job.id, size.width, size.height)?;
            self.store.transition(&job, JobState::TILE_DONE)?;
            info!(job_id = job.id, width = size.width, height = size.height, "Repaired tile metadata");
            report.repaired += 1;
        }

        info!(
            examined = report.examined,
            repaired = report.repaired,
            unrecoverable = report.unrecoverable,
            "Reconcile finished"
        );
        Ok(report)
    }

    /// Job counts per state. Read-only, so no lock is taken.
    pub fn status(&self) -> Result<StatusReport, OrchestratorError> {
        Ok(StatusReport::new(self.store.count_by_phase_status()?))
    }

    /// A job and its error log, oldest entry first.
    pub fn job_errors(&self, job_id: i64) -> Result<(MediaJob, Vec<ErrorLogEntry>), OrchestratorError> {
        let job = self
            .store
            .get(job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;
        let errors = self.store.list_errors(job_id)?;
        Ok((job, errors))
    }

    /// Centre id from either a numeric id or a registered short name.
    pub fn resolve_centre(&self, centre: &str) -> Result<i64, OrchestratorError> {
        if let Ok(id) = centre.parse::<i64>() {
            return Ok(id);
        }
        self.store
            .lookup_centre_id(centre)?
            .ok_or_else(|| OrchestratorError::UnknownCentre(centre.to_string()))
    }

    /// Download step for one (download, pending) job.
    ///
    /// Ends at (checksum, pending) or (download, failed). Callers must hold
    /// the centre's download lock.
    pub async fn download_job(
        &self,
        mut job: MediaJob,
        credential: Option<&Credential>,
    ) -> Result<(MediaJob, DownloadOutcome), OrchestratorError> {
        self.advance(&mut job, JobState::DOWNLOAD_RUNNING)?;
        let target = self.layout.original_path(&job);

        if let Some(dir) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                let message = format!("Cannot create {}: {}", dir.display(), e);
                warn!(job_id = job.id, "{}", message);
                self.fail(&mut job, Phase::Download, JobState::DOWNLOAD_FAILED, &message)?;
                return Ok((job, DownloadOutcome::Failed));
            }
        }
        remove_dangling_link(&target, job.id);

        let outcome = if target.exists() {
            debug!(job_id = job.id, path = %target.display(), "Original already on disk");
            DownloadOutcome::AlreadyPresent
        } else if let DedupOutcome::Linked { source_job_id, .. } = self.dedup.try_link(&job, &target)? {
            DownloadOutcome::Linked { source_job_id }
        } else {
            let request = FetchRequest::new(job.source_url.clone(), target.clone())
                .with_credential(credential.cloned())
                .skip_credentials(self.config.skips_credentials(job.context.centre_id));

            debug!(job_id = job.id, url = %job.source_url, "Fetching original");
            match self.transport.fetch(&request).await {
                Ok(fetched) => {
                    info!(
                        job_id = job.id,
                        url = %job.source_url,
                        bytes = fetched.bytes,
                        attempt = fetched.attempts,
                        anonymous = fetched.anonymous,
                        "Downloaded original"
                    );
                    DownloadOutcome::Fetched {
                        bytes: fetched.bytes,
                        attempts: fetched.attempts,
                        anonymous: fetched.anonymous,
                    }
                }
                Err(e) => {
                    warn!(
                        job_id = job.id,
                        url = %job.source_url,
                        kind = %e.kind,
                        attempt = e.attempts,
                        "Download failed: {}",
                        e.message
                    );
                    remove_partial(&target, job.id).await;
                    self.fail(&mut job, Phase::Download, JobState::DOWNLOAD_FAILED, &e.to_string())?;
                    return Ok((job, DownloadOutcome::Failed));
                }
            }
        };

        self.advance(&mut job, JobState::CHECKSUM_PENDING)?;
        Ok((job, outcome))
    }

    /// Checksum step for one (checksum, pending) job.
    ///
    /// Ends at (checksum, done) with the checksum recorded, or at
    /// (checksum, failed).
    pub async fn checksum_job(&self, mut job: MediaJob) -> Result<MediaJob, OrchestratorError> {
        self.advance(&mut job, JobState::CHECKSUM_RUNNING)?;
        let original = self.layout.original_path(&job);

        let checksum = match compute_checksum(&original, self.config.checksum_algorithm).await {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!(job_id = job.id, "Checksum failed: {}", e);
                self.fail(&mut job, Phase::Checksum, JobState::CHECKSUM_FAILED, &e.to_string())?;
                return Ok(job);
            }
        };

        match self.store.set_checksum(job.id, &checksum) {
            Ok(()) => {}
            Err(e @ JobStoreError::ChecksumConflict { .. }) => {
                warn!(job_id = job.id, %checksum, "Content changed since the last checksum: {}", e);
                self.fail(&mut job, Phase::Checksum, JobState::CHECKSUM_FAILED, &e.to_string())?;
                return Ok(job);
            }
            Err(e) => return Err(e.into()),
        }
        job.checksum = Some(checksum);

        self.advance(&mut job, JobState::CHECKSUM_DONE)?;
        info!(
            job_id = job.id,
            checksum = job.checksum.as_deref().unwrap_or_default(),
            is_image = job.is_image,
            "Checksum recorded"
        );
        Ok(job)
    }

    /// Tile step for one image at (checksum, done).
    ///
    /// Ends at (tile, done) with the image size recorded, or at (tile,
    /// failed). Callers must hold the tile lock.
    pub async fn tile_job(&self, mut job: MediaJob) -> Result<MediaJob, OrchestratorError> {
        self.advance(&mut job, JobState::TILE_RUNNING)?;

        let Some(checksum) = job.checksum.clone().filter(|c| !c.is_empty()) else {
            warn!(job_id = job.id, "No checksum recorded, cannot place tiles");
            self.fail(&mut job, Phase::Tile, JobState::TILE_FAILED, "No checksum recorded")?;
            return Ok(job);
        };

        let request = TileRequest {
            original: self.layout.original_path(&job),
            tiles_root: self.layout.tiles_root().to_path_buf(),
            tile_root: self.layout.tile_root(&checksum),
            tile_size: self.config.tile_size,
            scales: self.config.scales.clone(),
        };

        let size = match self.tiler.tile(&request).await {
            Ok(outcome) => outcome
                .size
                .or_else(|| recover_image_size(&request.tile_root, self.config.tile_size)),
            Err(e) => {
                warn!(job_id = job.id, tiler = self.tiler.name(), "Tiling failed: {}", e);
                self.fail(&mut job, Phase::Tile, JobState::TILE_FAILED, &e.to_string())?;
                return Ok(job);
            }
        };

        let Some(size) = size else {
            let message = format!(
                "Tiling finished but no image size is recoverable under {}",
                request.tile_root.display()
            );
            warn!(job_id = job.id, "{}", message);
            self.fail(&mut job, Phase::Tile, JobState::TILE_FAILED, &message)?;
            return Ok(job);
        };

        self.store.set_dimensions(job.id, size.width, size.height)?;
        job.width = Some(size.width);
        job.height = Some(size.height);

        self.advance(&mut job, JobState::TILE_DONE)?;
        info!(job_id = job.id, width = size.width, height = size.height, "Tiles generated");
        Ok(job)
    }

    async fn tile_pending(&self) -> Result<TileReport, OrchestratorError> {
        let pickup: Vec<MediaJob> = self
            .store
            .list_by_phase_status(JobState::CHECKSUM_DONE, None)?
            .into_iter()
            .filter(|job| job.is_image)
            .collect();
        info!(pending = pickup.len(), tiler = self.tiler.name(), "Starting tile generation");

        let mut report = TileReport::default();
        for job in pickup {
            let job = self.tile_job(job).await?;
            if job.state == JobState::TILE_DONE {
                report.tiled += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(tiled = report.tiled, failed = report.failed, "Tile run finished");
        Ok(report)
    }

    /// Commit `next` for `job` and mirror it locally.
    fn advance(&self, job: &mut MediaJob, next: JobState) -> Result<(), OrchestratorError> {
        self.store.transition(job, next)?;
        debug!(job_id = job.id, phase = %next.phase, from = %job.state, to = %next, "Transition");
        job.state = next;
        Ok(())
    }

    fn fail(
        &self,
        job: &mut MediaJob,
        phase: Phase,
        next: JobState,
        message: &str,
    ) -> Result<(), OrchestratorError> {
        self.store.append_error(job.id, phase, message)?;
        self.advance(job, next)
    }
}

/// A link left at the target whose source is gone would have the transfer
/// write through it into someone else's path.
fn remove_dangling_link(target: &Path, job_id: i64) {
    let is_link = std::fs::symlink_metadata(target)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_link && !target.exists() {
        match std::fs::remove_file(target) {
            Ok(()) => debug!(job_id, path = %target.display(), "Removed dangling link"),
            Err(e) => warn!(job_id, path = %target.display(), "Failed to remove dangling link: {}", e),
        }
    }
}

async fn remove_partial(target: &Path, job_id: i64) {
    match tokio::fs::remove_file(target).await {
        Ok(()) => debug!(job_id, path = %target.display(), "Removed partial download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(job_id, path = %target.display(), "Failed to remove partial download: {}", e),
    }
}
