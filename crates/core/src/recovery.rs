//! Rewinds jobs a killed run left `running`.
//!
//! Every phase run claims a job by marking it running before touching any
//! file, so a running job at the start of a run means the previous run
//! died mid-job. Each recovery pass returns such jobs to a state the next
//! phase run will pick up again, cleaning half-written artifacts first.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::job::{JobState, JobStore, JobStoreError, MediaJob};
use crate::layout::MediaLayout;

/// Suffix for interrupted downloads kept for inspection.
pub const INTERRUPTED_SUFFIX: &str = "interrupted";

/// What one recovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// (download, running) jobs rewound.
    pub interrupted_downloads: usize,
    /// (checksum, running) and legacy (download, done) jobs rewound.
    pub interrupted_checksums: usize,
    /// (tile, running) jobs rewound.
    pub interrupted_tiles: usize,
    /// Partial originals deleted or renamed aside.
    pub files_removed: usize,
    /// Incomplete tile trees deleted.
    pub tile_trees_removed: usize,
    /// (tile, done) jobs rewound because a deleted tree was theirs too.
    pub shared_tiles_rewound: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        *self == RecoveryReport::default()
    }
}

pub struct RecoveryManager {
    store: Arc<dyn JobStore>,
    layout: MediaLayout,
    preserve_partial_files: bool,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn JobStore>, layout: MediaLayout, preserve_partial_files: bool) -> Self {
        Self {
            store,
            layout,
            preserve_partial_files,
        }
    }

    /// Recovery ahead of a download run, limited to one centre.
    pub fn recover_downloads(&self, centre_id: Option<i64>) -> Result<RecoveryReport, JobStoreError> {
        let mut report = RecoveryReport::default();

        for job in self.store.list_by_phase_status(JobState::DOWNLOAD_RUNNING, centre_id)? {
            let target = self.layout.original_path(&job);
            if self.discard_partial(&job, &target) {
                report.files_removed += 1;
            }
            self.store.transition(&job, JobState::DOWNLOAD_PENDING)?;
            info!(job_id = job.id, "Rewound interrupted download");
            report.interrupted_downloads += 1;
        }

        // The file on disk is complete here: the next download run skips
        // the transfer and goes straight to checksum.
        for state in [JobState::CHECKSUM_RUNNING, JobState::DOWNLOAD_DONE] {
            for job in self.store.list_by_phase_status(state, centre_id)? {
                self.store.transition(&job, JobState::DOWNLOAD_PENDING)?;
                info!(job_id = job.id, from = %state, "Rewound interrupted checksum");
                report.interrupted_checksums += 1;
            }
        }

        if !report.is_empty() {
            info!(?centre_id, ?report, "Download recovery finished");
        }
        Ok(report)
    }

    /// Recovery ahead of a tile run.
    pub fn recover_tiles(&self) -> Result<RecoveryReport, JobStoreError> {
        let mut report = RecoveryReport::default();
        let mut removed = HashSet::new();

        for job in self.store.list_by_phase_status(JobState::TILE_RUNNING, None)? {
            if self.remove_tile_tree(&job) {
                report.tile_trees_removed += 1;
            }
            if let Some(checksum) = job.checksum.as_deref().filter(|c| !c.is_empty()) {
                removed.insert(checksum.to_string());
            }
            self.store.transition(&job, JobState::CHECKSUM_DONE)?;
            info!(job_id = job.id, "Rewound interrupted tile run");
            report.interrupted_tiles += 1;
        }
        report.shared_tiles_rewound = rewind_tile_sharers(self.store.as_ref(), &removed)?;

        if !report.is_empty() {
            info!(?report, "Tile recovery finished");
        }
        Ok(report)
    }

    /// Removes whatever the interrupted download left at `target`. Returns
    /// whether anything was there.
    fn discard_partial(&self, job: &MediaJob, target: &Path) -> bool {
        let metadata = match std::fs::symlink_metadata(target) {
            Ok(m) => m,
            Err(_) => return false,
        };

        let result = if metadata.file_type().is_symlink() || !self.preserve_partial_files {
            std::fs::remove_file(target)
        } else {
            let aside = interrupted_path(target);
            debug!(job_id = job.id, aside = %aside.display(), "Keeping partial download");
            std::fs::rename(target, &aside)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = job.id, path = %target.display(), "Failed to clear partial download: {}", e);
                false
            }
        }
    }

    /// Deletes the tile tree for the job's checksum. Jobs without a
    /// checksum have no tree of their own and are left alone.
    fn remove_tile_tree(&self, job: &MediaJob) -> bool {
        let Some(checksum) = job.checksum.as_deref().filter(|c| !c.is_empty()) else {
            return false;
        };
        remove_tree(&self.layout.tile_root(checksum), job.id)
    }
}

/// Deletes a tile tree. Returns whether one was there.
pub(crate) fn remove_tree(tile_root: &Path, job_id: i64) -> bool {
    match std::fs::remove_dir_all(tile_root) {
        Ok(()) => {
            debug!(job_id, tile_root = %tile_root.display(), "Removed tile tree");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(job_id, tile_root = %tile_root.display(), "Failed to remove tile tree: {}", e);
            false
        }
    }
}

/// Rewinds every (tile, done) job whose tiles live under one of the
/// `checksums`, so the next tile run regenerates the tree they share.
pub(crate) fn rewind_tile_sharers(
    store: &dyn JobStore,
    checksums: &HashSet<String>,
) -> Result<usize, JobStoreError> {
    if checksums.is_empty() {
        return Ok(0);
    }

    let mut rewound = 0;
    for job in store.list_by_phase_status(JobState::TILE_DONE, None)? {
        if job.checksum.as_deref().is_some_and(|c| checksums.contains(c)) {
            store.transition(&job, JobState::CHECKSUM_DONE)?;
            info!(job_id = job.id, "Rewound finished job whose tile tree was removed");
            rewound += 1;
        }
    }
    Ok(rewound)
}

/// `<dir>/42.jpg` becomes `<dir>/42.jpg.interrupted`.
fn interrupted_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(INTERRUPTED_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SqliteJobStore;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    struct Setup {
        _temp: TempDir,
        store: Arc<SqliteJobStore>,
        layout: MediaLayout,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let layout = MediaLayout::new(temp.path().join("originals"), temp.path().join("tiles"));
        Setup {
            _temp: temp,
            store: Arc::new(SqliteJobStore::in_memory().unwrap()),
            layout,
        }
    }

    fn manager(s: &Setup, preserve: bool) -> RecoveryManager {
        RecoveryManager::new(s.store.clone(), s.layout.clone(), preserve)
    }

    fn job_at(s: &Setup, measurement_id: i64, state: JobState) -> MediaJob {
        let job = fixtures::enqueue_job(
            s.store.as_ref(),
            1,
            measurement_id,
            &format!("http://c.org/{}.jpg", measurement_id),
        );
        s.store.set_phase_status(job.id, state).unwrap();
        s.store.get(job.id).unwrap().unwrap()
    }

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_interrupted_download_is_removed_and_rewound() {
        let s = setup();
        let job = job_at(&s, 1, JobState::DOWNLOAD_RUNNING);
        let target = s.layout.original_path(&job);
        write(&target, b"half");

        let report = manager(&s, false).recover_downloads(Some(1)).unwrap();

        assert_eq!(report.interrupted_downloads, 1);
        assert_eq!(report.files_removed, 1);
        assert!(!target.exists());
        assert_eq!(s.store.get(job.id).unwrap().unwrap().state, JobState::DOWNLOAD_PENDING);
    }

    #[test]
    fn test_interrupted_download_can_be_kept_aside() {
        let s = setup();
        let job = job_at(&s, 1, JobState::DOWNLOAD_RUNNING);
        let target = s.layout.original_path(&job);
        write(&target, b"half");

        manager(&s, true).recover_downloads(None).unwrap();

        assert!(!target.exists());
        assert_eq!(std::fs::read(interrupted_path(&target)).unwrap(), b"half");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_is_removed_even_when_preserving() {
        let s = setup();
        let job = job_at(&s, 1, JobState::DOWNLOAD_RUNNING);
        let target = s.layout.original_path(&job);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("/nonexistent/source.jpg", &target).unwrap();

        let report = manager(&s, true).recover_downloads(None).unwrap();

        assert_eq!(report.files_removed, 1);
        assert!(std::fs::symlink_metadata(&target).is_err());
        assert!(std::fs::symlink_metadata(interrupted_path(&target)).is_err());
    }

    #[test]
    fn test_checksum_and_legacy_done_rewind_without_touching_files() {
        let s = setup();
        let checksumming = job_at(&s, 1, JobState::CHECKSUM_RUNNING);
        let legacy = job_at(&s, 2, JobState::DOWNLOAD_DONE);
        let original = s.layout.original_path(&checksumming);
        write(&original, b"complete");

        let report = manager(&s, false).recover_downloads(Some(1)).unwrap();

        assert_eq!(report.interrupted_checksums, 2);
        assert!(original.exists());
        for id in [checksumming.id, legacy.id] {
            assert_eq!(s.store.get(id).unwrap().unwrap().state, JobState::DOWNLOAD_PENDING);
        }
    }

    #[test]
    fn test_download_recovery_is_scoped_to_centre() {
        let s = setup();
        let other = fixtures::enqueue_job(s.store.as_ref(), 2, 1, "http://c.org/x.jpg");
        s.store.set_phase_status(other.id, JobState::DOWNLOAD_RUNNING).unwrap();

        let report = manager(&s, false).recover_downloads(Some(1)).unwrap();

        assert!(report.is_empty());
        assert_eq!(s.store.get(other.id).unwrap().unwrap().state, JobState::DOWNLOAD_RUNNING);
    }

    #[test]
    fn test_interrupted_tile_run_loses_its_tree() {
        let s = setup();
        let job = job_at(&s, 1, JobState::CHECKSUM_RUNNING);
        let checksum = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        s.store.set_checksum(job.id, checksum).unwrap();
        s.store.set_phase_status(job.id, JobState::TILE_RUNNING).unwrap();
        let tile_root = s.layout.tile_root(checksum);
        write(&tile_root.join("256/100/1_1_0_0.jpg"), b"tile");

        let report = manager(&s, false).recover_tiles().unwrap();

        assert_eq!(report.interrupted_tiles, 1);
        assert_eq!(report.tile_trees_removed, 1);
        assert!(!tile_root.exists());
        assert!(s.layout.tiles_root().exists());
        assert_eq!(s.store.get(job.id).unwrap().unwrap().state, JobState::CHECKSUM_DONE);
    }

    #[test]
    fn test_finished_job_sharing_an_interrupted_tree_is_rewound() {
        let s = setup();
        let checksum = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        let running = job_at(&s, 1, JobState::CHECKSUM_RUNNING);
        let finished = job_at(&s, 2, JobState::CHECKSUM_RUNNING);
        let unrelated = job_at(&s, 3, JobState::CHECKSUM_RUNNING);
        s.store.set_checksum(running.id, checksum).unwrap();
        s.store.set_checksum(finished.id, checksum).unwrap();
        s.store.set_checksum(unrelated.id, "ffff").unwrap();
        s.store.set_phase_status(running.id, JobState::TILE_RUNNING).unwrap();
        s.store.set_phase_status(finished.id, JobState::TILE_DONE).unwrap();
        s.store.set_phase_status(unrelated.id, JobState::TILE_DONE).unwrap();
        write(&s.layout.tile_root(checksum).join("256/100/1_1_0_0.jpg"), b"tile");

        let recovery = manager(&s, false);
        let report = recovery.recover_tiles().unwrap();

        assert_eq!(report.interrupted_tiles, 1);
        assert_eq!(report.shared_tiles_rewound, 1);
        assert_eq!(s.store.get(finished.id).unwrap().unwrap().state, JobState::CHECKSUM_DONE);
        assert_eq!(s.store.get(unrelated.id).unwrap().unwrap().state, JobState::TILE_DONE);
        assert!(recovery.recover_tiles().unwrap().is_empty());
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let s = setup();
        let download = job_at(&s, 1, JobState::DOWNLOAD_RUNNING);
        write(&s.layout.original_path(&download), b"half");
        job_at(&s, 2, JobState::CHECKSUM_RUNNING);
        let tile = job_at(&s, 3, JobState::CHECKSUM_RUNNING);
        s.store.set_checksum(tile.id, "abcd").unwrap();
        s.store.set_phase_status(tile.id, JobState::TILE_RUNNING).unwrap();

        let recovery = manager(&s, false);
        let first_download = recovery.recover_downloads(None).unwrap();
        let first_tile = recovery.recover_tiles().unwrap();
        assert!(!first_download.is_empty());
        assert!(!first_tile.is_empty());

        let before = s.store.count_by_phase_status().unwrap();
        assert!(recovery.recover_downloads(None).unwrap().is_empty());
        assert!(recovery.recover_tiles().unwrap().is_empty());
        assert_eq!(s.store.count_by_phase_status().unwrap(), before);
    }
}
