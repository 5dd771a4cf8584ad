//! Logging configuration using tracing.
//!
//! Two sinks: stderr for the operator and an append-only log file. The file
//! location is resolved once per process and never changes afterwards.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "host-backup.log";

static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Path of the log file chosen at startup, if any
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().and_then(|p| p.as_deref())
}

/// Initialize logging with the specified level and preferred log file
pub fn init(level: &str, preferred_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut resolved = None;
    let file_layer = match open_log_file(preferred_file) {
        Some((path, file)) => {
            resolved = Some(path);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let _ = LOG_PATH.set(resolved);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    if let Some(path) = log_path() {
        tracing::debug!(log_file = %path.display(), "Logging to file");
    } else {
        tracing::warn!("No writable log file location, logging to stderr only");
    }

    Ok(())
}

/// Candidate locations in priority order: configured, XDG state dir, ~/.local/state
fn candidates(preferred: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = preferred {
        paths.push(p.to_path_buf());
    }
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        paths.push(PathBuf::from(state).join("host-backup").join(LOG_FILE_NAME));
    }
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".local/state/host-backup")
                .join(LOG_FILE_NAME),
        );
    }
    paths
}

fn open_log_file(preferred: Option<&Path>) -> Option<(PathBuf, File)> {
    candidates(preferred).into_iter().find_map(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some((path, file))
    })
}
