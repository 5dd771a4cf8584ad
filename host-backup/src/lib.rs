//! Host Backup Library
//!
//! Whole-system, incremental, snapshot and home-directory backups into local
//! destinations, with checksummed generations, retention, restore and cron
//! scheduling.

pub mod check;
pub mod config;
pub mod executor;
pub mod fs;
pub mod lifecycle;
pub mod orchestrator;
pub mod restore;
pub mod schedule;
pub mod store;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use store::BackupClass;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
