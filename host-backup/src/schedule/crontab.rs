//! Crontab storage.

use crate::store::record::write_atomic;
use crate::utils::{BackupError, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub trait CronTable {
    /// Current contents; a table that does not exist yet reads as empty
    fn read(&self) -> Result<String>;

    fn write(&self, contents: &str) -> Result<()>;

    /// User column required by system cron files (`/etc/cron.d`)
    fn user_field(&self) -> Option<&str> {
        None
    }
}

impl<T: CronTable + ?Sized> CronTable for Box<T> {
    fn read(&self) -> Result<String> {
        (**self).read()
    }

    fn write(&self, contents: &str) -> Result<()> {
        (**self).write(contents)
    }

    fn user_field(&self) -> Option<&str> {
        (**self).user_field()
    }
}

/// The invoking user's crontab, through `crontab -l` and `crontab -`
pub struct UserCrontab;

impl CronTable for UserCrontab {
    fn read(&self) -> Result<String> {
        let output = Command::new("crontab")
            .arg("-l")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackupError::ScheduleUpdateFailed(format!("crontab -l: {}", e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            return Ok(String::new());
        }
        Err(BackupError::ScheduleUpdateFailed(format!(
            "crontab -l exited with {:?}: {}",
            output.status.code(),
            stderr.trim()
        )))
    }

    fn write(&self, contents: &str) -> Result<()> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::ScheduleUpdateFailed(format!("crontab -: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .map_err(|e| BackupError::ScheduleUpdateFailed(format!("crontab -: {}", e)))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| BackupError::ScheduleUpdateFailed(format!("crontab -: {}", e)))?;
        if !output.status.success() {
            return Err(BackupError::ScheduleUpdateFailed(format!(
                "crontab - exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// A cron file such as `/etc/cron.d/host-backup`
pub struct FileCronTable {
    path: PathBuf,
    user: Option<String>,
}

impl FileCronTable {
    pub fn new(path: impl Into<PathBuf>, user: Option<String>) -> Self {
        Self {
            path: path.into(),
            user,
        }
    }
}

impl CronTable for FileCronTable {
    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(BackupError::ScheduleUpdateFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        write_atomic(&self.path, contents.as_bytes()).map_err(|e| {
            BackupError::ScheduleUpdateFailed(format!("{}: {}", self.path.display(), e))
        })
    }

    fn user_field(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        let table = FileCronTable::new(temp.path().join("host-backup"), Some("root".to_string()));
        assert_eq!(table.read().unwrap(), "");
        assert_eq!(table.user_field(), Some("root"));

        table.write("SHELL=/bin/sh\n").unwrap();
        assert_eq!(table.read().unwrap(), "SHELL=/bin/sh\n");
    }
}
