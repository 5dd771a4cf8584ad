//! System check: destination readiness, tool availability, free space and the
//! age of the newest generation per class. Used by `check` and after a restore.

use crate::config::Config;
use crate::fs::{check_destination, DestinationSpec, Readiness};
use crate::store::generation::latest_complete;
use crate::store::record::GenerationRecord;
use crate::store::BackupClass;
use chrono::Local;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TOOLS: [(&str, bool); 7] = [
    ("tar", true),
    ("rsync", false),
    ("zstd", false),
    ("pigz", false),
    ("gzip", false),
    ("sudo", false),
    ("crontab", false),
];

#[derive(Debug, Clone)]
pub struct DestinationStatus {
    pub label: &'static str,
    pub path: PathBuf,
    pub readiness: Result<Readiness, String>,
    pub free_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub name: &'static str,
    pub required: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LatestGeneration {
    pub class: BackupClass,
    pub name: Option<String>,
    pub age_hours: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SystemReport {
    pub destinations: Vec<DestinationStatus>,
    pub tools: Vec<ToolStatus>,
    pub latest: Vec<LatestGeneration>,
}

impl SystemReport {
    /// Every destination is ready and every required tool is installed
    pub fn is_healthy(&self) -> bool {
        self.destinations.iter().all(|d| d.readiness.is_ok())
            && self.tools.iter().all(|t| !t.required || t.path.is_some())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Destinations:");
        for d in &self.destinations {
            let state = match &d.readiness {
                Ok(_) => "ready".to_string(),
                Err(e) => format!("NOT READY ({})", e),
            };
            let free = d
                .free_bytes
                .map(|b| format!(", {} MiB free", b / (1024 * 1024)))
                .unwrap_or_default();
            let _ = writeln!(out, "  {:<7} {} {}{}", d.label, d.path.display(), state, free);
        }

        let _ = writeln!(out, "Tools:");
        for t in &self.tools {
            let state = match (&t.path, t.required) {
                (Some(p), _) => p.display().to_string(),
                (None, true) => "MISSING (required)".to_string(),
                (None, false) => "not installed".to_string(),
            };
            let _ = writeln!(out, "  {:<8} {}", t.name, state);
        }

        let _ = writeln!(out, "Latest generations:");
        for g in &self.latest {
            match (&g.name, g.age_hours) {
                (Some(name), Some(age)) => {
                    let _ = writeln!(out, "  {:<12} {} ({}h old)", g.class.as_str(), name, age);
                }
                (Some(name), None) => {
                    let _ = writeln!(out, "  {:<12} {}", g.class.as_str(), name);
                }
                (None, _) => {
                    let _ = writeln!(out, "  {:<12} none", g.class.as_str());
                }
            }
        }
        out
    }
}

/// Run every check; failures are reported in the result, not returned
pub fn run(config: &Config) -> SystemReport {
    let mut report = SystemReport::default();

    let system = config.destinations.system.as_path();
    report
        .destinations
        .push(destination_status("system", system, BackupClass::Snapshot, None));
    if let Some(home) = config.destinations.home.as_deref() {
        report.destinations.push(destination_status(
            "home",
            home,
            BackupClass::Home,
            config.destinations.home_sync_client.as_deref(),
        ));
    }

    report.tools = TOOLS
        .iter()
        .map(|&(name, required)| ToolStatus {
            name,
            required,
            path: which::which(name).ok(),
        })
        .collect();

    for class in BackupClass::ALL {
        let Some(subtree) = class.subtree(config) else {
            continue;
        };
        report.latest.push(latest_generation(class, &subtree));
    }

    if report.is_healthy() {
        info!("System check passed");
    } else {
        warn!("System check found problems");
    }
    report
}

fn destination_status(
    label: &'static str,
    path: &Path,
    class: BackupClass,
    sync_client: Option<&str>,
) -> DestinationStatus {
    let readiness = check_destination(&DestinationSpec {
        path,
        subdirs: class.required_subdirs(),
        sync_client,
    })
    .map_err(|e| {
        warn!(destination = %path.display(), error = %e, "Destination not ready");
        e.to_string()
    });

    DestinationStatus {
        label,
        path: path.to_path_buf(),
        free_bytes: readiness.as_ref().ok().and_then(|_| free_bytes(path)),
        readiness,
    }
}

fn free_bytes(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    Some(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

fn latest_generation(class: BackupClass, subtree: &Path) -> LatestGeneration {
    let latest = latest_complete(subtree).ok().flatten();
    let age_hours = latest
        .as_ref()
        .and_then(|g| GenerationRecord::read(&g.path).ok().flatten())
        .map(|r| (Local::now() - r.started_at).num_hours());

    LatestGeneration {
        class,
        name: latest.map(|g| g.name.as_str().to_string()),
        age_hours,
    }
}
