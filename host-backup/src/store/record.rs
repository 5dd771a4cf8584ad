//! Generation record, serialized as `generation.json` in each generation.
//!
//! The record is what later runs read back: the previous generation's size for
//! the shrink check, and the member list for restore instructions.

use crate::store::BackupClass;
use crate::utils::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const RECORD_FILE: &str = "generation.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub version: u32,
    pub class: BackupClass,
    pub run_id: String,
    pub host: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub compression: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub failed_members: Vec<FailedMember>,
    pub total_bytes: u64,
}

/// A member whose archiver exited with an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMember {
    pub member: String,
    pub exit_status: Option<i32>,
    pub detail: String,
}

impl GenerationRecord {
    pub fn read(generation: &Path) -> Result<Option<Self>> {
        let path = generation.join(RECORD_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, generation: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        write_atomic(&generation.join(RECORD_FILE), body.as_bytes())
    }
}

/// Write through a sibling temp file and rename into place
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Host name for records and restore instructions
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(GenerationRecord::read(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_record_written_atomically() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let record = GenerationRecord {
            version: 1,
            class: BackupClass::Incremental,
            run_id: "run".to_string(),
            host: host_name(),
            started_at: now,
            finished_at: now,
            compression: "none".to_string(),
            members: vec!["etc.tar".to_string()],
            failed_members: vec![FailedMember {
                member: "var.tar".to_string(),
                exit_status: Some(2),
                detail: "Cannot open".to_string(),
            }],
            total_bytes: 42,
        };
        record.write(temp.path()).unwrap();

        assert!(!temp.path().join("generation.json.tmp").exists());
        let back = GenerationRecord::read(temp.path()).unwrap().unwrap();
        assert_eq!(back.class, BackupClass::Incremental);
        assert_eq!(back.total_bytes, 42);
        assert_eq!(back.failed_members[0].exit_status, Some(2));
    }
}
