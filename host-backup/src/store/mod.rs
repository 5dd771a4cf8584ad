//! On-disk layout of a backup destination.
//!
//! ```text
//! <destination>/
//!   full/<YYYYMMDD_HHMMSS>/...
//!   incremental/<YYYYMMDD_HHMMSS>/...
//!   incremental/.last_run
//!   rsync_snapshots/<YYYYMMDD_HHMMSS>/root/...
//! ```

pub mod generation;
pub mod marker;
pub mod record;
pub mod retention;

use crate::config::Config;
use crate::utils::BackupError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const FULL_DIR: &str = "full";
pub const INCREMENTAL_DIR: &str = "incremental";
pub const SNAPSHOT_DIR: &str = "rsync_snapshots";

/// Kind of backup, each owning one subtree of one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupClass {
    /// Whole-system archive, one member per top-level entry
    Full,
    /// Files changed since the last-run marker
    Incremental,
    /// rsync mirror of the source root
    Snapshot,
    /// Single-target archive of the home directory
    Home,
}

impl BackupClass {
    pub const ALL: [BackupClass; 4] = [
        BackupClass::Full,
        BackupClass::Incremental,
        BackupClass::Snapshot,
        BackupClass::Home,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupClass::Full => "full",
            BackupClass::Incremental => "incremental",
            BackupClass::Snapshot => "snapshot",
            BackupClass::Home => "home",
        }
    }

    pub fn subdir(&self) -> &'static str {
        match self {
            BackupClass::Full | BackupClass::Home => FULL_DIR,
            BackupClass::Incremental => INCREMENTAL_DIR,
            BackupClass::Snapshot => SNAPSHOT_DIR,
        }
    }

    /// Destination root for this class, if configured
    pub fn destination<'a>(&self, config: &'a Config) -> Option<&'a Path> {
        match self {
            BackupClass::Home => config.destinations.home.as_deref(),
            _ => Some(config.destinations.system.as_path()),
        }
    }

    /// Directory holding this class' generations
    pub fn subtree(&self, config: &Config) -> Option<PathBuf> {
        self.destination(config).map(|d| d.join(self.subdir()))
    }

    pub fn keep(&self, config: &Config) -> usize {
        match self {
            BackupClass::Full => config.archive.keep_full,
            BackupClass::Incremental => config.archive.keep_incremental,
            BackupClass::Snapshot => config.archive.keep_snapshots,
            BackupClass::Home => config.archive.keep_home,
        }
    }

    /// Subdirectories the destination must carry for this class
    pub fn required_subdirs(&self) -> &'static [&'static str] {
        match self {
            BackupClass::Home => &[FULL_DIR],
            BackupClass::Snapshot => &[FULL_DIR, INCREMENTAL_DIR, SNAPSHOT_DIR],
            _ => &[FULL_DIR, INCREMENTAL_DIR],
        }
    }

    /// Generations are tar archives (as opposed to a mirrored tree)
    pub fn is_archive(&self) -> bool {
        !matches!(self, BackupClass::Snapshot)
    }

    /// Touches privileged parts of the system
    pub fn is_system_wide(&self) -> bool {
        !matches!(self, BackupClass::Home)
    }
}

impl fmt::Display for BackupClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupClass {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupClass::Full),
            "incremental" | "incr" => Ok(BackupClass::Incremental),
            "snapshot" | "rsync" => Ok(BackupClass::Snapshot),
            "home" => Ok(BackupClass::Home),
            other => Err(BackupError::Config(format!("unknown backup class '{}'", other))),
        }
    }
}
