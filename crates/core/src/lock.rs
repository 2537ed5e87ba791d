//! Single-instance guards for phase runs.
//!
//! Every run takes one named lock before it reads the job store. Names are
//! per phase, and per centre for downloads (see [`LockName`]).

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    /// Another run holds the lock.
    #[error("Lock {name} is held by another run")]
    Contended { name: String },

    #[error("Lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The lock a phase run must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    Discover,
    Download { centre_id: i64 },
    /// Shared by tile, retile and reconcile; they all write tile state.
    Tile,
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockName::Discover => f.write_str("discover"),
            LockName::Download { centre_id } => write!(f, "download-{}", centre_id),
            LockName::Tile => f.write_str("tile"),
        }
    }
}

/// Held lock. Released on drop.
pub struct LockGuard {
    name: String,
    _held: Box<dyn Send>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, held: impl Send + 'static) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Non-blocking exclusive locks.
pub trait LockProvider: Send + Sync {
    /// Returns [`LockError::Contended`] at once when the lock is taken.
    fn try_acquire(&self, name: LockName) -> Result<LockGuard, LockError>;
}

/// Advisory `flock`-style locks on files in one directory.
pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/mediafetch-<name>.lock`
    pub fn lock_path(&self, name: LockName) -> PathBuf {
        self.dir.join(format!("mediafetch-{}.lock", name))
    }
}

struct FileLock {
    file: File,
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Remove while still locked so no waiter can lock the doomed inode.
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "Failed to remove lock file: {}", e);
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), "Failed to unlock lock file: {}", e);
        }
        debug!(path = %self.path.display(), "Released lock");
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, name: LockName) -> Result<LockGuard, LockError> {
        let path = self.lock_path(name);
        let io_err = |source: io::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                info!(lock = %name, path = %path.display(), "Lock is held by another run");
                return Err(LockError::Contended {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(io_err(e)),
        }

        // The holder we raced may have removed the file between our open
        // and our lock; then we locked an orphaned inode.
        if !same_file(&file, &path) {
            info!(lock = %name, "Lock file was replaced while acquiring it");
            return Err(LockError::Contended {
                name: name.to_string(),
            });
        }

        info!(lock = %name, path = %path.display(), "Acquired lock");
        Ok(LockGuard::new(name.to_string(), FileLock { file, path }))
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}
