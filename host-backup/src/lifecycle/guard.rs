//! Run context: paths registered for cleanup when a run ends.
//!
//! Temporary paths are always removed. Generation directories are removed only
//! while their incomplete marker is still present; a finished generation is never
//! touched, whatever happens later in the same run.

use crate::store::generation::INCOMPLETE_MARKER;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Registered {
    temp: Vec<PathBuf>,
    generations: Vec<PathBuf>,
}

/// Per-invocation state shared by every component of one run
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    unattended: bool,
    cancel: CancellationToken,
    registered: Mutex<Registered>,
}

/// What a cleanup pass removed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub temp_removed: Vec<PathBuf>,
    pub generations_removed: Vec<PathBuf>,
}

impl RunContext {
    pub fn new(unattended: bool) -> Self {
        Self::with_cancel(unattended, CancellationToken::new())
    }

    pub fn with_cancel(unattended: bool, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            unattended,
            cancel,
            registered: Mutex::new(Registered::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Unattended runs never prompt
    pub fn is_unattended(&self) -> bool {
        self.unattended
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn register_temp(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "Registered temporary path");
        self.lock().temp.push(path);
    }

    /// Forget a temporary path that has been moved into its final place
    pub fn release_temp(&self, path: &Path) {
        self.lock().temp.retain(|p| p != path);
    }

    pub fn register_generation(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(generation = %path.display(), "Registered in-progress generation");
        self.lock().generations.push(path);
    }

    /// Remove registered paths. Safe to call more than once.
    pub fn cleanup(&self) -> CleanupReport {
        let (temp, generations) = {
            let mut reg = self.lock();
            (
                std::mem::take(&mut reg.temp),
                std::mem::take(&mut reg.generations),
            )
        };

        let mut report = CleanupReport::default();

        for path in temp {
            if remove_path(&path) {
                report.temp_removed.push(path);
            }
        }

        for gen in generations {
            if !gen.join(INCOMPLETE_MARKER).exists() {
                continue;
            }
            warn!(generation = %gen.display(), "Removing incomplete generation");
            if remove_path(&gen) {
                report.generations_removed.push(gen);
            }
        }

        if !report.temp_removed.is_empty() || !report.generations_removed.is_empty() {
            info!(
                temp = report.temp_removed.len(),
                generations = report.generations_removed.len(),
                "Run cleanup complete"
            );
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registered> {
        // A poisoned list is still a valid list of paths
        self.registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_path(path: &Path) -> bool {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cleanup failed");
            false
        }
    }
}
