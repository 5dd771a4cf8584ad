//! Last-run marker for incremental backups.
//!
//! The marker's mtime is the "changed since" boundary. A run stages a new marker
//! when it starts (so files modified during the run are picked up next time) and
//! renames it into place only if it archived something.

use crate::lifecycle::RunContext;
use crate::utils::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub const LAST_RUN_FILE: &str = ".last_run";

#[derive(Debug, Clone)]
pub struct LastRunMarker {
    path: PathBuf,
}

/// A marker written at run start, not yet in place
#[derive(Debug)]
pub struct StagedMarker {
    staged: PathBuf,
    target: PathBuf,
}

impl LastRunMarker {
    pub fn in_subtree(subtree: &Path) -> Self {
        Self {
            path: subtree.join(LAST_RUN_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the current marker, if one exists
    pub fn boundary(&self) -> Result<Option<SystemTime>> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the replacement marker now; it is removed with the run's temp files
    /// unless committed.
    pub fn stage(&self, ctx: &RunContext) -> Result<StagedMarker> {
        let staged = self
            .path
            .with_file_name(format!("{}.{}.tmp", LAST_RUN_FILE, ctx.run_id()));
        std::fs::write(
            &staged,
            format!("{}\n", chrono::Local::now().to_rfc3339()),
        )?;
        ctx.register_temp(&staged);
        Ok(StagedMarker {
            staged,
            target: self.path.clone(),
        })
    }
}

impl StagedMarker {
    /// Atomically replace the live marker
    pub fn commit(self, ctx: &RunContext) -> Result<()> {
        std::fs::rename(&self.staged, &self.target)?;
        ctx.release_temp(&self.staged);
        debug!(marker = %self.target.display(), "Last-run marker updated");
        Ok(())
    }
}
