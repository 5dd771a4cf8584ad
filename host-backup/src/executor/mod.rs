//! Archive engine: produces backup generations.
//!
//! Every class follows the same contract: create the generation with its
//! incomplete marker, write members, then checksums, record and restore
//! instructions, and only then drop the marker. Retention runs on the subtree
//! afterwards. A member that fails is recorded and the run moves on; the run
//! itself fails only when nothing could be written.

pub mod compressor;
pub mod instructions;
pub mod process;

use crate::config::Config;
use crate::fs::walker::{calculate_total_size, changed_since, top_level_entries, WalkOptions};
use crate::fs::ExclusionSet;
use crate::lifecycle::{Elevation, RunContext};
use crate::store::generation::{list_complete, Generation};
use crate::store::marker::{LastRunMarker, StagedMarker};
use crate::store::record::{host_name, FailedMember, GenerationRecord};
use crate::store::{retention, BackupClass, FULL_DIR, INCREMENTAL_DIR};
use crate::utils::{BackupError, Result};
use crate::verify::{self, VerifyOutcome};
use chrono::{DateTime, Local};
use compressor::Compression;
use instructions::RestoreInstructions;
use process::run_tool;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

const RECORD_VERSION: u32 = 1;

/// Directory inside a snapshot generation holding the mirrored tree
pub const SNAPSHOT_ROOT: &str = "root";

/// What a backup run produced
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub class: BackupClass,
    /// None when an incremental run found nothing to archive
    pub generation: Option<PathBuf>,
    pub members: Vec<String>,
    pub failed: Vec<FailedMember>,
    pub total_bytes: u64,
    /// Total size fell below a quarter of the previous generation's
    pub shrink_warning: bool,
    pub removed_by_retention: Vec<String>,
    /// Filled in by the post-backup verification step
    pub verification: Option<VerifyOutcome>,
}

impl BackupOutcome {
    fn nothing_to_do(class: BackupClass) -> Self {
        Self {
            class,
            generation: None,
            members: Vec::new(),
            failed: Vec::new(),
            total_bytes: 0,
            shrink_warning: false,
            removed_by_retention: Vec::new(),
            verification: None,
        }
    }
}

/// How tar's exit status is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitVerdict {
    Ok,
    /// Exit 1: some file changed while being read
    Warning,
    Failed,
}

pub(crate) fn tar_verdict(code: Option<i32>) -> ExitVerdict {
    match code {
        Some(0) => ExitVerdict::Ok,
        Some(1) => ExitVerdict::Warning,
        _ => ExitVerdict::Failed,
    }
}

pub(crate) fn rsync_verdict(code: Option<i32>) -> ExitVerdict {
    match code {
        Some(0) => ExitVerdict::Ok,
        // 24: source files vanished during the transfer
        Some(24) => ExitVerdict::Warning,
        _ => ExitVerdict::Failed,
    }
}

/// Total fell below a quarter of the previous generation's size
pub fn shrank_suspiciously(previous: u64, current: u64) -> bool {
    previous > 0 && current.saturating_mul(4) < previous
}

/// Members collected while a generation is being written
#[derive(Default)]
struct Members {
    written: Vec<String>,
    failed: Vec<FailedMember>,
}

/// Input for one tar invocation, relative to `cwd`
enum TarInput<'a> {
    /// A single top-level path
    Entry(&'a str),
    /// NUL-delimited file list streamed on stdin
    List(Vec<u8>),
}

pub struct ArchiveEngine<'a> {
    config: &'a Config,
    ctx: &'a RunContext,
    elevation: Elevation,
    exclusions: ExclusionSet,
}

impl<'a> ArchiveEngine<'a> {
    pub fn new(
        config: &'a Config,
        ctx: &'a RunContext,
        elevation: Elevation,
        exclusions: ExclusionSet,
    ) -> Self {
        Self {
            config,
            ctx,
            elevation,
            exclusions,
        }
    }

    /// Run one backup of `class`
    pub async fn run(&self, class: BackupClass) -> Result<BackupOutcome> {
        let subtree = class.subtree(self.config).ok_or_else(|| {
            BackupError::Config(format!("no destination configured for {} backups", class))
        })?;
        std::fs::create_dir_all(&subtree)?;

        match class {
            BackupClass::Full => self.full_system(&subtree).await,
            BackupClass::Home => self.full_home(&subtree).await,
            BackupClass::Incremental => self.incremental(&subtree).await,
            BackupClass::Snapshot => self.snapshot(&subtree).await,
        }
    }

    fn compression(&self) -> Result<Compression> {
        require_tool("tar")?;
        let compression = Compression::select(&self.config.archive.compression);
        if let Some(tool) = compression.tool() {
            require_tool(tool)?;
        }
        info!(compression = %compression, "Compression selected");
        Ok(compression)
    }

    /// Directory the members of `class` are relative to; a restore extracts
    /// them onto the matching directory of the target
    fn archive_root(&self, class: BackupClass) -> &Path {
        let root = self.config.source.root.as_path();
        match (class, self.config.source.home.as_deref()) {
            (BackupClass::Home, Some(home)) => {
                split_home(root, home).map_or(root, |(anchor, _)| anchor)
            }
            _ => root,
        }
    }

    fn marker(&self) -> LastRunMarker {
        LastRunMarker::in_subtree(&self.config.destinations.system.join(INCREMENTAL_DIR))
    }

    /// Single-target archive of the home directory
    async fn full_home(&self, subtree: &Path) -> Result<BackupOutcome> {
        let home = self
            .config
            .source
            .home
            .as_deref()
            .ok_or_else(|| BackupError::Config("source.home is not set".to_string()))?;
        let root = self.config.source.root.as_path();
        let (anchor, relative, name) = match (split_home(root, home), home.file_name()) {
            (Some((anchor, relative)), Some(name)) => (
                anchor,
                relative.to_string_lossy().into_owned(),
                name.to_string_lossy().into_owned(),
            ),
            _ => {
                return Err(BackupError::Config(format!(
                    "cannot archive {} as a single target",
                    home.display()
                )))
            }
        };
        if !home.is_dir() {
            return Err(BackupError::Config(format!(
                "home directory {} does not exist",
                home.display()
            )));
        }

        let compression = self.compression()?;
        let started = Local::now();
        let generation = Generation::create(subtree, started, self.ctx)?;
        info!(generation = %generation.path.display(), source = %home.display(), "Home backup started");

        let mut members = Members::default();
        let member = format!("{}{}", name, compression.suffix());
        let excludes = self.exclusions.patterns_under(anchor, home);
        self.archive_member(
            &generation,
            &member,
            compression,
            anchor,
            TarInput::Entry(&relative),
            &excludes,
            &mut members,
        )
        .await?;

        self.finalize(BackupClass::Home, subtree, generation, started, compression, members, None)
            .await
    }

    /// One member per top-level entry of the source root
    async fn full_system(&self, subtree: &Path) -> Result<BackupOutcome> {
        let root = self.config.source.root.as_path();
        let compression = self.compression()?;
        std::fs::create_dir_all(self.config.destinations.system.join(INCREMENTAL_DIR))?;
        let staged = self.marker().stage(self.ctx)?;
        let started = Local::now();
        let generation = Generation::create(subtree, started, self.ctx)?;
        info!(generation = %generation.path.display(), root = %root.display(), "Full backup started");

        let mut members = Members::default();
        for entry in top_level_entries(root)? {
            if self.exclusions.is_excluded(&entry) {
                info!(entry = %entry.display(), "Skipping excluded entry");
                continue;
            }
            let Some(name) = entry.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let member = format!("{}{}", name, compression.suffix());
            let excludes = self.exclusions.patterns_under(root, &entry);
            self.archive_member(
                &generation,
                &member,
                compression,
                root,
                TarInput::Entry(&name),
                &excludes,
                &mut members,
            )
            .await?;
        }

        let outcome = self
            .finalize(
                BackupClass::Full,
                subtree,
                generation,
                started,
                compression,
                members,
                Some(staged),
            )
            .await?;

        if outcome.total_bytes > self.config.archive.min_full_size_bytes {
            let incremental = self.config.destinations.system.join(INCREMENTAL_DIR);
            let cleared = retention::keep_newest(&incremental, 0)?;
            if !cleared.is_empty() {
                info!(removed = cleared.len(), "Cleared incremental generations superseded by full backup");
            }
        } else {
            warn!(
                total_bytes = outcome.total_bytes,
                threshold = self.config.archive.min_full_size_bytes,
                "Full backup below size threshold, keeping incremental generations"
            );
        }
        Ok(outcome)
    }

    /// Files changed since the last-run boundary, one member per top-level entry
    async fn incremental(&self, subtree: &Path) -> Result<BackupOutcome> {
        let root = self.config.source.root.as_path();
        let compression = self.compression()?;
        let marker = self.marker();
        let boundary = self.incremental_boundary(&marker)?;
        let staged = marker.stage(self.ctx)?;
        let started = Local::now();
        let generation = Generation::create(subtree, started, self.ctx)?;
        info!(
            generation = %generation.path.display(),
            since = %DateTime::<Local>::from(boundary).to_rfc3339(),
            "Incremental backup started"
        );

        let options = WalkOptions::excluding(self.exclusions.clone());
        let mut members = Members::default();

        for entry in top_level_entries(root)? {
            if self.ctx.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            if self.exclusions.is_excluded(&entry) {
                continue;
            }
            let meta = match std::fs::symlink_metadata(&entry) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(entry = %entry.display(), error = %e, "Cannot stat entry");
                    continue;
                }
            };
            if meta.file_type().is_symlink() {
                continue;
            }

            let changed: Vec<PathBuf> = if meta.is_dir() {
                changed_since(&entry, boundary, &options)?
                    .into_iter()
                    .map(|f| f.path)
                    .collect()
            } else if meta.is_file() && meta.modified()? > boundary {
                vec![entry.clone()]
            } else {
                Vec::new()
            };
            if changed.is_empty() {
                continue;
            }

            let Some(name) = entry.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let member = format!("{}{}", name, compression.suffix());
            info!(entry = %entry.display(), files = changed.len(), "Changed files found");
            self.archive_member(
                &generation,
                &member,
                compression,
                root,
                TarInput::List(null_delimited(root, &changed)),
                &[],
                &mut members,
            )
            .await?;
        }

        if members.written.is_empty() && members.failed.is_empty() {
            info!("No files changed since the last run");
            generation.discard()?;
            return Ok(BackupOutcome::nothing_to_do(BackupClass::Incremental));
        }

        self.finalize(
            BackupClass::Incremental,
            subtree,
            generation,
            started,
            compression,
            members,
            Some(staged),
        )
        .await
    }

    /// Marker mtime, else the newest complete full backup's start, else the epoch
    fn incremental_boundary(&self, marker: &LastRunMarker) -> Result<SystemTime> {
        if let Some(boundary) = marker.boundary()? {
            return Ok(boundary);
        }
        let full = self.config.destinations.system.join(FULL_DIR);
        for generation in list_complete(&full)? {
            if let Some(record) = GenerationRecord::read(&generation.path)? {
                if record.class == BackupClass::Full {
                    info!(generation = %generation.name.as_str(), "No last-run marker, using latest full backup");
                    return Ok(SystemTime::from(record.started_at));
                }
            }
        }
        warn!("No last-run marker or full backup, archiving every file");
        Ok(SystemTime::UNIX_EPOCH)
    }

    /// rsync mirror with hard links into the previous snapshot
    async fn snapshot(&self, subtree: &Path) -> Result<BackupOutcome> {
        require_tool("rsync")?;
        let root = self.config.source.root.as_path();
        let previous = list_complete(subtree)?.into_iter().next();
        let started = Local::now();
        let generation = Generation::create(subtree, started, self.ctx)?;
        let target = generation.path.join(SNAPSHOT_ROOT);
        std::fs::create_dir(&target)?;
        info!(generation = %generation.path.display(), root = %root.display(), "Snapshot started");

        let mut cmd = self.elevation.command("rsync");
        cmd.args(["-aH", "--delete", "--numeric-ids"]);
        if self.elevation != Elevation::NotRequired {
            cmd.arg("-AX");
        }
        if let Some(previous) = &previous {
            cmd.arg(format!(
                "--link-dest={}",
                previous.path.join(SNAPSHOT_ROOT).display()
            ));
        }
        for pattern in self.exclusions.rsync_patterns(root) {
            cmd.arg(format!("--exclude={}", pattern));
        }
        cmd.arg(format!("{}/", root.display()))
            .arg(format!("{}/", target.display()));

        let output = run_tool(cmd, None, self.ctx.cancel_token()).await?;
        let mut members = Members::default();
        match rsync_verdict(output.code()) {
            ExitVerdict::Ok => {}
            ExitVerdict::Warning => {
                warn!(generation = %generation.path.display(), "Some files vanished during the snapshot");
            }
            // 23: partial transfer, the mirror is usable but incomplete
            ExitVerdict::Failed if output.code() == Some(23) => {
                error!(
                    generation = %generation.path.display(),
                    stderr = %output.stderr,
                    "Snapshot incomplete, some files could not be transferred"
                );
                members.failed.push(FailedMember {
                    member: SNAPSHOT_ROOT.to_string(),
                    exit_status: output.code(),
                    detail: output.stderr,
                });
            }
            ExitVerdict::Failed => {
                return Err(BackupError::ArchiveMemberFailed {
                    member: SNAPSHOT_ROOT.to_string(),
                    reason: format!("rsync exited with {:?}: {}", output.code(), output.stderr),
                });
            }
        }

        self.finalize(
            BackupClass::Snapshot,
            subtree,
            generation,
            started,
            Compression::None,
            members,
            None,
        )
        .await
    }

    /// Write one member through a `.part` file. Member failures are recorded in
    /// `members`; only cancellation and missing tools are returned as errors.
    #[allow(clippy::too_many_arguments)]
    async fn archive_member(
        &self,
        generation: &Generation,
        member: &str,
        compression: Compression,
        cwd: &Path,
        input: TarInput<'_>,
        excludes: &[String],
        members: &mut Members,
    ) -> Result<()> {
        if self.ctx.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let final_path = generation.path.join(member);
        let part = generation.path.join(format!("{}.part", member));
        self.ctx.register_temp(&part);

        let mut cmd = self.elevation.command("tar");
        cmd.arg("-c").arg("-f").arg(&part).arg("-C").arg(cwd);
        cmd.args(compression.tar_args());
        if !excludes.is_empty() {
            cmd.arg("--anchored");
            for pattern in excludes {
                cmd.arg(format!("--exclude={}", pattern));
            }
        }
        let stdin = match input {
            TarInput::Entry(name) => {
                cmd.arg("--").arg(name);
                None
            }
            TarInput::List(list) => {
                cmd.args(["--ignore-failed-read", "--null", "-T", "-"]);
                Some(list)
            }
        };

        let output = run_tool(cmd, stdin, self.ctx.cancel_token()).await?;
        let verdict = tar_verdict(output.code());

        if verdict == ExitVerdict::Failed {
            let _ = std::fs::remove_file(&part);
            self.ctx.release_temp(&part);
            let failure = BackupError::ArchiveMemberFailed {
                member: member.to_string(),
                reason: format!("tar exited with {:?}", output.code()),
            };
            error!(
                generation = %generation.path.display(),
                exit_status = ?output.code(),
                stderr = %output.stderr,
                "{}",
                failure
            );
            members.failed.push(FailedMember {
                member: member.to_string(),
                exit_status: output.code(),
                detail: output.stderr,
            });
            return Ok(());
        }

        if verdict == ExitVerdict::Warning {
            warn!(member = %member, stderr = %output.stderr, "Files changed while archiving");
        }
        std::fs::rename(&part, &final_path)?;
        self.ctx.release_temp(&part);
        info!(member = %member, "Member written");
        members.written.push(member.to_string());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        class: BackupClass,
        subtree: &Path,
        generation: Generation,
        started: DateTime<Local>,
        compression: Compression,
        members: Members,
        staged: Option<StagedMarker>,
    ) -> Result<BackupOutcome> {
        if class.is_archive() && members.written.is_empty() {
            let failed: Vec<&str> = members.failed.iter().map(|f| f.member.as_str()).collect();
            return Err(BackupError::ArchiveMemberFailed {
                member: failed.join(", "),
                reason: "no member could be written".to_string(),
            });
        }

        verify::create_checksums(&generation.path).await?;

        let total_bytes = if class.is_archive() {
            let mut total = 0u64;
            for member in &members.written {
                total += std::fs::metadata(generation.path.join(member))?.len();
            }
            total
        } else {
            calculate_total_size(&generation.path.join(SNAPSHOT_ROOT))?
        };

        let previous = previous_size(subtree, class, &generation.path)?;
        let shrink_warning = shrank_suspiciously(previous, total_bytes);
        if shrink_warning {
            error!(
                generation = %generation.path.display(),
                previous_bytes = previous,
                total_bytes,
                "Backup is less than a quarter of the previous one, check the source"
            );
        }

        let host = host_name();
        let record = GenerationRecord {
            version: RECORD_VERSION,
            class,
            run_id: self.ctx.run_id().to_string(),
            host: host.clone(),
            started_at: started,
            finished_at: Local::now(),
            compression: compression.name().to_string(),
            members: members.written.clone(),
            failed_members: members.failed.clone(),
            total_bytes,
        };
        record.write(&generation.path)?;

        let failed_names: Vec<String> = members.failed.iter().map(|f| f.member.clone()).collect();
        RestoreInstructions {
            host: &host,
            class,
            generation: generation.name.as_str(),
            created: started,
            root: self.archive_root(class),
            members: &members.written,
            failed: &failed_names,
        }
        .write(&generation.path)?;

        generation.mark_complete()?;
        if let Some(staged) = staged {
            staged.commit(self.ctx)?;
        }

        let removed_by_retention =
            retention::keep_newest_of(subtree, class, class.keep(self.config))?;

        info!(
            class = %class,
            generation = %generation.path.display(),
            members = members.written.len(),
            failed = members.failed.len(),
            total_bytes,
            "Backup complete"
        );

        Ok(BackupOutcome {
            class,
            generation: Some(generation.path),
            members: members.written,
            failed: members.failed,
            total_bytes,
            shrink_warning,
            removed_by_retention,
            verification: None,
        })
    }
}

/// Split `home` into the directory tar runs in and the path it archives.
///
/// A home below the source root keeps its path under that root, so restoring
/// onto the target puts it back in place; any other home is kept relative to `/`.
pub(crate) fn split_home<'p>(root: &'p Path, home: &'p Path) -> Option<(&'p Path, &'p Path)> {
    let anchor = if home.starts_with(root) && home != root {
        root
    } else {
        Path::new("/")
    };
    let relative = home.strip_prefix(anchor).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some((anchor, relative))
}

fn require_tool(tool: &str) -> Result<()> {
    which::which(tool)
        .map(|_| ())
        .map_err(|_| BackupError::MissingTool(tool.to_string()))
}

/// Recorded size of the newest other complete generation of the same class
fn previous_size(subtree: &Path, class: BackupClass, current: &Path) -> Result<u64> {
    for generation in list_complete(subtree)? {
        if generation.path == current {
            continue;
        }
        if let Some(record) = GenerationRecord::read(&generation.path)? {
            if record.class == class {
                return Ok(record.total_bytes);
            }
        }
    }
    Ok(0)
}

/// Paths relative to `root`, each terminated by NUL
fn null_delimited(root: &Path, paths: &[PathBuf]) -> Vec<u8> {
    let mut out = Vec::new();
    for path in paths {
        let rel = path.strip_prefix(root).unwrap_or(path);
        out.extend_from_slice(rel.as_os_str().as_bytes());
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{check_destination, DestinationSpec};
    use crate::store::generation::list_generations;
    use crate::verify::manifest::Manifest;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(source: &Path, dest: &Path) -> Config {
        let mut config = Config::default();
        config.source.root = source.to_path_buf();
        config.source.home = Some(source.join("home"));
        config.source.exclude = vec![source.join("cache")];
        config.destinations.system = dest.to_path_buf();
        config.archive.compression = "none".to_string();
        config.privilege.require_root = false;
        config
    }

    fn ready(dest: &Path, class: BackupClass) {
        check_destination(&DestinationSpec {
            path: dest,
            subdirs: class.required_subdirs(),
            sync_client: None,
        })
        .unwrap();
    }

    #[test]
    fn test_exit_verdicts() {
        assert_eq!(tar_verdict(Some(0)), ExitVerdict::Ok);
        assert_eq!(tar_verdict(Some(1)), ExitVerdict::Warning);
        assert_eq!(tar_verdict(Some(2)), ExitVerdict::Failed);
        assert_eq!(tar_verdict(None), ExitVerdict::Failed);
        assert_eq!(rsync_verdict(Some(24)), ExitVerdict::Warning);
        assert_eq!(rsync_verdict(Some(23)), ExitVerdict::Failed);
    }

    #[test]
    fn test_home_keeps_its_path_below_the_source_root() {
        assert_eq!(
            split_home(Path::new("/"), Path::new("/home/alice")),
            Some((Path::new("/"), Path::new("home/alice")))
        );
        assert_eq!(
            split_home(Path::new("/srv/root"), Path::new("/srv/root/home/alice")),
            Some((Path::new("/srv/root"), Path::new("home/alice")))
        );
        assert_eq!(
            split_home(Path::new("/srv/root"), Path::new("/data/alice")),
            Some((Path::new("/"), Path::new("data/alice")))
        );
        assert_eq!(split_home(Path::new("/"), Path::new("/")), None);
        assert_eq!(split_home(Path::new("/"), Path::new("home/alice")), None);
    }

    #[test]
    fn test_shrink_threshold() {
        assert!(!shrank_suspiciously(0, 0));
        assert!(!shrank_suspiciously(400, 100));
        assert!(shrank_suspiciously(400, 99));
        assert!(!shrank_suspiciously(100, 1000));
    }

    #[test]
    fn test_null_delimited_is_relative() {
        let list = null_delimited(
            Path::new("/src"),
            &[PathBuf::from("/src/etc/hosts"), PathBuf::from("/src/etc/a b")],
        );
        assert_eq!(list, b"etc/hosts\0etc/a b\0".to_vec());
    }

    #[tokio::test]
    async fn test_full_backup_skips_excluded_entries() {
        if which::which("tar").is_err() {
            return;
        }
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        for dir in ["etc", "home", "cache"] {
            fs::create_dir(source.path().join(dir)).unwrap();
            fs::write(source.path().join(dir).join("file"), dir).unwrap();
        }
        let config = config_for(source.path(), dest.path());
        ready(dest.path(), BackupClass::Full);

        let ctx = RunContext::new(true);
        let exclusions = ExclusionSet::build(&config.source.exclude, [dest.path()]);
        let engine = ArchiveEngine::new(&config, &ctx, Elevation::NotRequired, exclusions);
        let outcome = engine.run(BackupClass::Full).await.unwrap();

        assert_eq!(outcome.members, vec!["etc.tar", "home.tar"]);
        assert!(outcome.failed.is_empty());
        let generation = outcome.generation.unwrap();
        assert_eq!(Manifest::read(&generation).unwrap().unwrap().entries.len(), 2);
        assert!(Generation::open(&generation).unwrap().is_complete());
        // Full backups refresh the incremental boundary
        assert!(dest.path().join(INCREMENTAL_DIR).join(".last_run").exists());
    }

    #[tokio::test]
    async fn test_shrunken_source_warns_but_succeeds() {
        if which::which("tar").is_err() {
            return;
        }
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir(source.path().join("etc")).unwrap();
        let data = source.path().join("etc").join("data");
        fs::write(&data, vec![b'x'; 2 * 1024 * 1024]).unwrap();
        let mut config = config_for(source.path(), dest.path());
        config.archive.keep_full = 2;
        ready(dest.path(), BackupClass::Full);
        let ctx = RunContext::new(true);
        let exclusions = ExclusionSet::build(&config.source.exclude, [dest.path()]);
        let engine = ArchiveEngine::new(&config, &ctx, Elevation::NotRequired, exclusions);

        let first = engine.run(BackupClass::Full).await.unwrap();
        assert!(!first.shrink_warning);

        fs::write(&data, b"x").unwrap();
        let second = engine.run(BackupClass::Full).await.unwrap();
        assert!(second.shrink_warning);
        assert!(second.total_bytes * 4 < first.total_bytes);
        assert!(Generation::open(&second.generation.unwrap()).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_incremental_without_changes_leaves_nothing() {
        if which::which("tar").is_err() {
            return;
        }
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir(source.path().join("etc")).unwrap();
        fs::write(source.path().join("etc").join("hosts"), b"127.0.0.1").unwrap();
        let config = config_for(source.path(), dest.path());
        ready(dest.path(), BackupClass::Incremental);
        let exclusions = ExclusionSet::build(&config.source.exclude, [dest.path()]);

        let first = {
            let ctx = RunContext::new(true);
            let engine =
                ArchiveEngine::new(&config, &ctx, Elevation::NotRequired, exclusions.clone());
            engine.run(BackupClass::Incremental).await.unwrap()
        };
        assert_eq!(first.members, vec!["etc.tar"]);

        let marker = dest.path().join(INCREMENTAL_DIR).join(".last_run");
        let before = fs::metadata(&marker).unwrap().modified().unwrap();

        let second = {
            let ctx = RunContext::new(true);
            let engine = ArchiveEngine::new(&config, &ctx, Elevation::NotRequired, exclusions);
            engine.run(BackupClass::Incremental).await.unwrap()
        };
        assert!(second.generation.is_none());
        assert_eq!(fs::metadata(&marker).unwrap().modified().unwrap(), before);
        assert_eq!(
            list_generations(&dest.path().join(INCREMENTAL_DIR)).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_home_is_a_config_error() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut config = config_for(source.path(), dest.path());
        config.destinations.home = Some(dest.path().to_path_buf());
        let ctx = RunContext::new(true);
        let engine =
            ArchiveEngine::new(&config, &ctx, Elevation::NotRequired, ExclusionSet::default());

        assert!(matches!(
            engine.run(BackupClass::Home).await,
            Err(BackupError::Config(_))
        ));
    }
}
