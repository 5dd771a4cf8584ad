//! Error types for the backup orchestrator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Destination unavailable: {0} does not exist")]
    DestinationUnavailable(PathBuf),

    #[error("Destination unreadable: {path}: {source}")]
    DestinationUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination {path} is empty and sync client '{client}' is not running")]
    DestinationEmpty { path: PathBuf, client: String },

    #[error("Destination not writable: {0}")]
    DestinationNotWritable(PathBuf),

    #[error("Destination {0} is locked by another run")]
    DestinationLocked(PathBuf),

    #[error("Required tool not found: {0}")]
    MissingTool(String),

    #[error("Archive member {member} failed: {reason}")]
    ArchiveMemberFailed { member: String, reason: String },

    #[error("Verification failed for {generation}: {} mismatched entries ({})", .failed.len(), .failed.join(", "))]
    VerifyFailed {
        generation: PathBuf,
        failed: Vec<String>,
    },

    #[error("Quick verification failed for {generation}: {}", .failed.join(", "))]
    QuickVerifyFailed {
        generation: PathBuf,
        failed: Vec<String>,
    },

    #[error("No backups found in {0}")]
    NoBackupsFound(PathBuf),

    #[error("Retention failed in {path}: {source}")]
    RetentionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schedule update failed: {0}")]
    ScheduleUpdateFailed(String),

    #[error("Invalid schedule expression: {0}")]
    InvalidSchedule(String),

    #[error("Elevated privileges unavailable: {0}")]
    PrivilegeUnavailable(String),

    #[error("Restore aborted: {0}")]
    RestoreAborted(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for BackupError {
    fn from(err: config::ConfigError) -> Self {
        BackupError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
