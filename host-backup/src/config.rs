//! Configuration management for the backup orchestrator.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`HOST_BACKUP__ARCHIVE__KEEP_FULL=5`). The loaded value is immutable and shared
//! by every component.

use crate::utils::Result;
use crate::verify::QUICK_SAMPLE_MAX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "HOST_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub source: SourceConfig,
    pub destinations: DestinationConfig,
    pub archive: ArchiveConfig,
    pub verify: VerifyConfig,
    pub restore: RestoreConfig,
    pub schedule: ScheduleConfig,
    pub privilege: PrivilegeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Append-only log file; falls back to the XDG state directory when unusable
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root whose top-level entries are archived by whole-system backups
    pub root: PathBuf,

    /// Directory archived by the single-target home backup
    pub home: Option<PathBuf>,

    /// Static exclusions (absolute paths)
    pub exclude: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Destination for full, incremental and snapshot generations
    pub system: PathBuf,

    /// Destination for the home backup
    pub home: Option<PathBuf>,

    /// Process that must be running before the home destination is trusted
    /// (cloud sync clients expose an empty mount point until they are up)
    pub home_sync_client: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Compression scheme (auto, zstd, pigz, gzip, bzip2, xz, none)
    pub compression: String,

    pub keep_full: usize,
    pub keep_incremental: usize,
    pub keep_snapshots: usize,
    pub keep_home: usize,

    /// A full backup larger than this supersedes the incremental subtree
    pub min_full_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Verification run right after a backup (none, quick, full)
    pub post_backup: String,

    /// Number of manifest entries checked by a quick verification
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Filesystem root that restores are written onto
    pub target: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `user` for the invoking user's crontab, otherwise a cron file path
    pub crontab: String,

    pub full: String,
    pub incremental: String,
    pub snapshot: String,
    pub home: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Whole-system operations need root (directly or through sudo)
    pub require_root: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("/var/log/host-backup.log")),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            home: std::env::var_os("HOME").map(PathBuf::from),
            exclude: [
                "/proc",
                "/sys",
                "/dev",
                "/run",
                "/tmp",
                "/mnt",
                "/media",
                "/lost+found",
                "/swapfile",
                "/var/tmp",
                "/var/cache",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            system: PathBuf::from("/mnt/backup"),
            home: None,
            home_sync_client: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: "auto".to_string(),
            keep_full: 3,
            keep_incremental: 7,
            keep_snapshots: 3,
            keep_home: 5,
            min_full_size_bytes: 100 * 1024 * 1024, // 100 MiB
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            post_backup: "quick".to_string(),
            sample_size: 5,
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from("/"),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            crontab: "user".to_string(),
            full: "0 3 * * 0".to_string(),
            incremental: "0 3 * * 1-6".to_string(),
            snapshot: "30 2 * * *".to_string(),
            home: "0 4 * * *".to_string(),
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self { require_root: true }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::build(Some(path))
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self> {
        Self::build(None)
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::BackupError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if !self.source.root.is_absolute() {
            return Err(crate::BackupError::Config(format!(
                "source.root must be absolute: {}",
                self.source.root.display()
            )));
        }
        if !self.destinations.system.is_absolute() {
            return Err(crate::BackupError::Config(format!(
                "destinations.system must be absolute: {}",
                self.destinations.system.display()
            )));
        }
        if !(1..=QUICK_SAMPLE_MAX).contains(&self.verify.sample_size) {
            return Err(crate::BackupError::Config(format!(
                "verify.sample_size must be between 1 and {}",
                QUICK_SAMPLE_MAX
            )));
        }
        Ok(())
    }
}
