//! Destination readiness checks.
//!
//! A destination must exist, be listable, carry its required subdirectories and
//! accept writes before anything is archived into it.

use crate::utils::{BackupError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{info, warn};

/// Placeholder written into an empty generic destination
pub const PLACEHOLDER_FILE: &str = ".host-backup";

const WRITE_PROBE_PREFIX: &str = ".write-probe-";

/// What a destination must provide
#[derive(Debug, Clone)]
pub struct DestinationSpec<'a> {
    pub path: &'a Path,
    pub subdirs: &'a [&'a str],
    /// Process that must be running when the destination is empty
    pub sync_client: Option<&'a str>,
}

/// Outcome of a successful readiness check
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    pub path: PathBuf,
    pub created_subdirs: Vec<String>,
    pub placeholder_created: bool,
    pub repaired_permissions: bool,
}

/// Run every readiness check against `spec`
pub fn check_destination(spec: &DestinationSpec<'_>) -> Result<Readiness> {
    let path = spec.path;
    let mut readiness = Readiness {
        path: path.to_path_buf(),
        ..Readiness::default()
    };

    if !path.exists() {
        return Err(BackupError::DestinationUnavailable(path.to_path_buf()));
    }

    let is_empty = fs::read_dir(path)
        .map_err(|source| BackupError::DestinationUnreadable {
            path: path.to_path_buf(),
            source,
        })?
        .next()
        .is_none();

    if is_empty {
        match spec.sync_client {
            Some(client) if !process_running(client) => {
                return Err(BackupError::DestinationEmpty {
                    path: path.to_path_buf(),
                    client: client.to_string(),
                });
            }
            _ => {
                warn!(destination = %path.display(), "Destination is empty, creating placeholder");
                fs::write(path.join(PLACEHOLDER_FILE), b"host-backup destination\n").map_err(
                    |_| BackupError::DestinationNotWritable(path.to_path_buf()),
                )?;
                readiness.placeholder_created = true;
            }
        }
    }

    if !write_probe(path) {
        warn!(destination = %path.display(), "Write probe failed, attempting ownership repair");
        repair_permissions(path);
        readiness.repaired_permissions = true;
        if !write_probe(path) {
            return Err(BackupError::DestinationNotWritable(path.to_path_buf()));
        }
    }

    for sub in spec.subdirs {
        let dir = path.join(sub);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .map_err(|_| BackupError::DestinationNotWritable(dir.clone()))?;
            info!(destination = %path.display(), subdir = %sub, "Created destination subdirectory");
            readiness.created_subdirs.push(sub.to_string());
        }
    }

    Ok(readiness)
}

fn write_probe(dir: &Path) -> bool {
    let probe = dir.join(format!("{}{}", WRITE_PROBE_PREFIX, std::process::id()));
    let ok = fs::write(&probe, b"probe").is_ok();
    let _ = fs::remove_file(&probe);
    ok
}

/// Best effort: take ownership and add owner rwx. Failures surface through the
/// second write probe.
fn repair_permissions(dir: &Path) {
    let uid = nix::unistd::geteuid();
    let gid = nix::unistd::getegid();
    if let Err(e) = nix::unistd::chown(dir, Some(uid), Some(gid)) {
        warn!(destination = %dir.display(), error = %e, "chown failed");
    }
    if let Ok(meta) = fs::metadata(dir) {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o700);
        if let Err(e) = fs::set_permissions(dir, perms) {
            warn!(destination = %dir.display(), error = %e, "chmod failed");
        }
    }
}

/// True if a process whose command name equals `name` is running
pub fn process_running(name: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    let running = sys.processes_by_exact_name(name).next().is_some();
    running
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUBDIRS: &[&str] = &["full", "incremental"];

    #[test]
    fn test_missing_destination() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let spec = DestinationSpec {
            path: &missing,
            subdirs: SUBDIRS,
            sync_client: None,
        };

        assert!(matches!(
            check_destination(&spec),
            Err(BackupError::DestinationUnavailable(_))
        ));
    }

    #[test]
    fn test_empty_destination_gets_placeholder_and_subdirs() {
        let temp = TempDir::new().unwrap();
        let spec = DestinationSpec {
            path: temp.path(),
            subdirs: SUBDIRS,
            sync_client: None,
        };

        let readiness = check_destination(&spec).unwrap();
        assert!(readiness.placeholder_created);
        assert_eq!(readiness.created_subdirs, vec!["full", "incremental"]);
        assert!(temp.path().join("full").is_dir());
        assert!(temp.path().join("incremental").is_dir());

        // Second run is a no-op
        let again = check_destination(&spec).unwrap();
        assert!(!again.placeholder_created);
        assert!(again.created_subdirs.is_empty());
    }

    #[test]
    fn test_empty_destination_requires_sync_client() {
        let temp = TempDir::new().unwrap();
        let spec = DestinationSpec {
            path: temp.path(),
            subdirs: SUBDIRS,
            sync_client: Some("no-such-sync-client-xyz"),
        };

        assert!(matches!(
            check_destination(&spec),
            Err(BackupError::DestinationEmpty { .. })
        ));
        assert!(!temp.path().join("full").exists());
    }

    #[test]
    fn test_sync_client_ignored_when_populated() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("existing"), b"data").unwrap();
        let spec = DestinationSpec {
            path: temp.path(),
            subdirs: SUBDIRS,
            sync_client: Some("no-such-sync-client-xyz"),
        };

        assert!(check_destination(&spec).is_ok());
    }

    #[test]
    fn test_process_running_sees_nothing_bogus() {
        assert!(!process_running("definitely-not-a-process-name"));
    }

    #[test]
    fn test_process_running_finds_child() {
        let Ok(mut child) = std::process::Command::new("sleep").arg("30").spawn() else {
            return;
        };
        let found = process_running("sleep");
        let _ = child.kill();
        let _ = child.wait();
        assert!(found);
    }
}
