//! Generation directories: naming, ordering, creation and completion.
//!
//! A generation is named after its start time, `YYYYMMDD_HHMMSS`. Names sort
//! chronologically, which is what retention and restore listing rely on. When the
//! name is already taken (two runs within one second, or a clock that went back)
//! a collision suffix `_1`, `_2`, ... is appended; ordering compares that suffix
//! numerically.

use crate::lifecycle::RunContext;
use crate::utils::{BackupError, Result};
use chrono::{DateTime, Local};
use std::cmp::Ordering;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Present while a generation is being written
pub const INCOMPLETE_MARKER: &str = ".incomplete";

const NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

const MEMBER_SUFFIXES: [&str; 5] = [".tar", ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst"];

/// Parsed generation name, ordered chronologically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationName {
    raw: String,
    /// Date and time digits, time padded to seconds
    stamp: u64,
    collision: u32,
}

impl GenerationName {
    /// `YYYYMMDD`, optionally `_HHMM` or `_HHMMSS`, optionally `_<n>`
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('_');
        let date = parts.next()?;
        if date.len() != 8 || !all_digits(date) {
            return None;
        }

        let time = match parts.next() {
            None => "000000".to_string(),
            Some(t) if all_digits(t) && t.len() == 6 => t.to_string(),
            Some(t) if all_digits(t) && t.len() == 4 => format!("{}00", t),
            Some(_) => return None,
        };

        let collision = match parts.next() {
            None => 0,
            Some(n) if !n.is_empty() && all_digits(n) => n.parse().ok()?,
            Some(_) => return None,
        };

        if parts.next().is_some() {
            return None;
        }

        let stamp = format!("{}{}", date, time).parse().ok()?;
        Some(Self {
            raw: name.to_string(),
            stamp,
            collision,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for GenerationName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp
            .cmp(&other.stamp)
            .then(self.collision.cmp(&other.collision))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for GenerationName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// A generation directory on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub name: GenerationName,
    pub path: PathBuf,
}

impl Generation {
    /// Claim a fresh generation directory under `subtree` and mark it incomplete.
    ///
    /// The directory is registered with the run context so an interrupted run
    /// removes it.
    pub fn create(subtree: &Path, started: DateTime<Local>, ctx: &RunContext) -> Result<Self> {
        fs::create_dir_all(subtree)?;
        let base = started.format(NAME_FORMAT).to_string();

        let mut collision = 0u32;
        let (name, path) = loop {
            let candidate = if collision == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, collision)
            };
            let path = subtree.join(&candidate);
            match fs::create_dir(&path) {
                Ok(()) => break (candidate, path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(generation = %candidate, "Generation name taken, adding suffix");
                    collision += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        fs::write(
            path.join(INCOMPLETE_MARKER),
            format!("run={} pid={}\n", ctx.run_id(), std::process::id()),
        )?;
        ctx.register_generation(&path);

        info!(generation = %path.display(), "Generation started");
        let name = GenerationName::parse(&name).ok_or_else(|| {
            BackupError::Config(format!("generated unparsable generation name {}", name))
        })?;
        Ok(Self { name, path })
    }

    /// Open an existing generation directory
    pub fn open(path: &Path) -> Option<Self> {
        let name = GenerationName::parse(&path.file_name()?.to_string_lossy())?;
        path.is_dir().then(|| Self {
            name,
            path: path.to_path_buf(),
        })
    }

    pub fn is_complete(&self) -> bool {
        !self.path.join(INCOMPLETE_MARKER).exists()
    }

    /// Remove the incomplete marker. From here on the run guard leaves it alone.
    pub fn mark_complete(&self) -> Result<()> {
        match fs::remove_file(self.path.join(INCOMPLETE_MARKER)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(generation = %self.path.display(), "Generation complete");
        Ok(())
    }

    /// Delete the directory outright (empty incremental runs)
    pub fn discard(self) -> Result<()> {
        fs::remove_dir_all(&self.path)?;
        info!(generation = %self.path.display(), "Generation discarded");
        Ok(())
    }

    /// Archive members of this generation, sorted by name
    pub fn members(&self) -> Result<Vec<String>> {
        members_in(&self.path)
    }
}

/// Regular files in `dir` that are archive members, sorted by name
pub fn members_in(dir: &Path) -> Result<Vec<String>> {
    let mut members: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| is_member_name(name))
        .collect();
    members.sort();
    Ok(members)
}

/// Archive members end in one of the tar suffixes; partial writes (`.part`) and
/// metadata files do not
pub fn is_member_name(name: &str) -> bool {
    MEMBER_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// All generations under `subtree`, newest first. Non-generation entries are
/// ignored; a missing subtree yields an empty list.
pub fn list_generations(subtree: &Path) -> Result<Vec<Generation>> {
    let entries = match fs::read_dir(subtree) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut generations: Vec<Generation> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| Generation::open(&e.path()))
        .collect();

    generations.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(generations)
}

/// Completed generations only, newest first
pub fn list_complete(subtree: &Path) -> Result<Vec<Generation>> {
    Ok(list_generations(subtree)?
        .into_iter()
        .filter(Generation::is_complete)
        .collect())
}

/// Newest completed generation, if any
pub fn latest_complete(subtree: &Path) -> Result<Option<Generation>> {
    Ok(list_complete(subtree)?.into_iter().next())
}
