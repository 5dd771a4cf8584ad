//! Exclusive per-destination lock.
//!
//! A scheduled run and a manual run must not write into the same destination at
//! the same time. The lock is a non-blocking `flock` on a file inside the
//! destination, released when the guard is dropped or the process dies.

use crate::utils::{BackupError, Result};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE: &str = ".host-backup.lock";

#[derive(Debug)]
pub struct DestinationLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl DestinationLock {
    /// Take the lock or fail immediately with `DestinationLocked`
    pub fn acquire(destination: &Path) -> Result<Self> {
        let path = destination.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_file, nix::errno::Errno::EWOULDBLOCK)) => {
                return Err(BackupError::DestinationLocked(destination.to_path_buf()));
            }
            Err((_file, e)) => return Err(BackupError::Io(std::io::Error::from(e))),
        };

        // Owner pid for operators inspecting a stuck lock
        let _ = lock.set_len(0);
        let _ = writeln!(&mut *lock, "{}", std::process::id());

        debug!(lock = %path.display(), "Destination lock acquired");
        Ok(Self { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_lock() {
        let temp = TempDir::new().unwrap();

        let first = DestinationLock::acquire(temp.path()).expect("first lock");
        let second = DestinationLock::acquire(temp.path());
        assert!(matches!(second, Err(BackupError::DestinationLocked(_))));

        drop(first);
        assert!(DestinationLock::acquire(temp.path()).is_ok());
    }
}
