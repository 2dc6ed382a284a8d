use crate::error::{BackupError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Process-wide guard that keeps two orchestrator runs from overlapping.
///
/// Backed by an advisory `flock` on a lock file. The kernel drops the lock
/// when the holding process exits, so a run killed by a signal never leaves a
/// stale lock behind.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
}

/// Proof of holding the [`RunLock`]. Released on [`LockToken::release`] or drop.
pub struct LockToken {
    path: PathBuf,
    flock: Option<Flock<File>>,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never blocks: a held lock is reported as [`BackupError::LockBusy`].
    pub fn acquire(&self) -> Result<LockToken> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => flock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(BackupError::LockBusy(self.path.clone()));
            }
            Err((_, errno)) => return Err(BackupError::Io(io::Error::from(errno))),
        };

        let mut holder: &File = &flock;
        holder.set_len(0)?;
        writeln!(holder, "{}", std::process::id())?;

        debug!("Acquired run lock {}", self.path.display());
        Ok(LockToken {
            path: self.path.clone(),
            flock: Some(flock),
        })
    }
}

impl LockToken {
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(flock) = self.flock.take() {
            match flock.unlock() {
                Ok(_) => debug!("Released run lock {}", self.path.display()),
                Err((_, errno)) => {
                    warn!("Failed to release run lock {}: {}", self.path.display(), errno)
                }
            }
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.unlock();
    }
}
