//! Entry points behind the CLI.
//!
//! Each operation rebuilds the exclusion set from the configuration, checks and
//! locks the destination it writes to, resolves elevated access, and runs inside
//! a span carrying the run id.

use crate::check::{self, SystemReport};
use crate::config::Config;
use crate::executor::{ArchiveEngine, BackupOutcome};
use crate::fs::{check_destination, DestinationSpec, ExclusionSet};
use crate::lifecycle::{DestinationLock, Elevation, RunContext};
use crate::restore::prompt::Prompt;
use crate::restore::{RestoreEngine, RestoreOutcome, RestoreRequest};
use crate::schedule::crontab::{CronTable, FileCronTable, UserCrontab};
use crate::schedule::{cron_command, default_expression, ScheduleManager};
use crate::store::generation::{list_complete, list_generations};
use crate::store::record::GenerationRecord;
use crate::store::BackupClass;
use crate::utils::{BackupError, Result};
use crate::verify::transcript::{failed_entries, TRANSCRIPT_FILE};
use crate::verify::{self, VerifyMode, VerifyReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// One row of `list`
#[derive(Debug, Clone)]
pub struct GenerationSummary {
    pub class: BackupClass,
    pub name: String,
    pub path: PathBuf,
    pub complete: bool,
    pub members: usize,
    pub total_bytes: Option<u64>,
    /// Entries marked FAILED in the last full verification transcript
    pub failed_verification: Vec<String>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    ctx: Arc<RunContext>,
    config_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, ctx: Arc<RunContext>) -> Self {
        Self {
            config,
            ctx,
            config_path: None,
        }
    }

    /// Config file passed on to scheduled runs
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Static exclusions plus every configured destination
    pub fn exclusions(&self) -> ExclusionSet {
        let destinations = std::iter::once(self.config.destinations.system.as_path())
            .chain(self.config.destinations.home.as_deref());
        ExclusionSet::build(&self.config.source.exclude, destinations)
    }

    fn destination(&self, class: BackupClass) -> Result<&Path> {
        class.destination(&self.config).ok_or_else(|| {
            BackupError::Config(format!("no destination configured for {} backups", class))
        })
    }

    fn ready(&self, class: BackupClass) -> Result<&Path> {
        let path = self.destination(class)?;
        let sync_client = match class {
            BackupClass::Home => self.config.destinations.home_sync_client.as_deref(),
            _ => None,
        };
        let readiness = check_destination(&DestinationSpec {
            path,
            subdirs: class.required_subdirs(),
            sync_client,
        })?;
        if !readiness.created_subdirs.is_empty() {
            info!(destination = %path.display(), created = ?readiness.created_subdirs, "Prepared destination");
        }
        Ok(path)
    }

    async fn elevation(&self, system_wide: bool) -> Result<Elevation> {
        Elevation::resolve(
            self.config.privilege.require_root && system_wide,
            self.ctx.is_unattended(),
        )
        .await
    }

    /// Archive, retain, then verify the new generation
    pub async fn backup(&self, class: BackupClass) -> Result<BackupOutcome> {
        let span = info_span!("backup", run_id = %self.ctx.run_id(), class = %class);
        self.run_backup(class).instrument(span).await
    }

    async fn run_backup(&self, class: BackupClass) -> Result<BackupOutcome> {
        let destination = self.ready(class)?;
        let _lock = DestinationLock::acquire(destination)?;
        let elevation = self.elevation(class.is_system_wide()).await?;

        let engine = ArchiveEngine::new(&self.config, &self.ctx, elevation, self.exclusions());
        let mut outcome = engine.run(class).await?;

        if let Some(generation) = &outcome.generation {
            let mode: VerifyMode = self.config.verify.post_backup.parse()?;
            outcome.verification = Some(
                verify::verify_after_backup(generation, mode, self.config.verify.sample_size).await,
            );
        }
        Ok(outcome)
    }

    pub async fn restore(
        &self,
        request: &RestoreRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<RestoreOutcome> {
        let span = info_span!("restore", run_id = %self.ctx.run_id());
        self.run_restore(request, prompt).instrument(span).await
    }

    async fn run_restore(
        &self,
        request: &RestoreRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<RestoreOutcome> {
        // Retention must not remove the generation being restored
        let mut locks: Vec<DestinationLock> = Vec::new();
        for class in [BackupClass::Full, BackupClass::Home] {
            let Some(dest) = class.destination(&self.config) else {
                continue;
            };
            if dest.is_dir() && !locks.iter().any(|l| l.path().parent() == Some(dest)) {
                locks.push(DestinationLock::acquire(dest)?);
            }
        }

        let system_wide = request.class.map_or(true, |c| c.is_system_wide());
        let elevation = self.elevation(system_wide).await?;
        RestoreEngine::new(&self.config, &self.ctx, elevation, self.exclusions())
            .run(request, prompt)
            .await
    }

    /// Verify one generation, the newest complete one unless named
    pub async fn verify(
        &self,
        class: BackupClass,
        generation: Option<&str>,
        mode: VerifyMode,
    ) -> Result<VerifyReport> {
        let span = info_span!("verify", run_id = %self.ctx.run_id(), class = %class);
        self.run_verify(class, generation, mode).instrument(span).await
    }

    async fn run_verify(
        &self,
        class: BackupClass,
        generation: Option<&str>,
        mode: VerifyMode,
    ) -> Result<VerifyReport> {
        let destination = self.destination(class)?;
        let _lock = DestinationLock::acquire(destination)?;
        let subtree = destination.join(class.subdir());

        let candidates = list_complete(&subtree)?;
        let selected = match generation {
            Some(name) => candidates.into_iter().find(|g| g.name.as_str() == name),
            None => candidates.into_iter().next(),
        }
        .ok_or_else(|| BackupError::NoBackupsFound(subtree.clone()))?;

        verify::verify(&selected.path, mode, self.config.verify.sample_size).await
    }

    /// Generations of one class or of every configured class, newest first
    pub fn list(&self, class: Option<BackupClass>) -> Result<Vec<GenerationSummary>> {
        let classes: Vec<BackupClass> = match class {
            Some(c) => vec![c],
            None => BackupClass::ALL.to_vec(),
        };

        let mut rows = Vec::new();
        for class in classes {
            let Some(subtree) = class.subtree(&self.config) else {
                continue;
            };
            for generation in list_generations(&subtree)? {
                let record = GenerationRecord::read(&generation.path).ok().flatten();
                if record.as_ref().is_some_and(|r| r.class != class) {
                    continue;
                }
                let failed_verification = std::fs::read_to_string(generation.path.join(TRANSCRIPT_FILE))
                    .map(|t| failed_entries(&t))
                    .unwrap_or_default();
                rows.push(GenerationSummary {
                    class,
                    name: generation.name.as_str().to_string(),
                    complete: generation.is_complete(),
                    members: record.as_ref().map(|r| r.members.len()).unwrap_or(0),
                    total_bytes: record.as_ref().map(|r| r.total_bytes),
                    path: generation.path,
                    failed_verification,
                });
            }
        }
        Ok(rows)
    }

    pub fn check(&self) -> SystemReport {
        check::run(&self.config)
    }

    fn schedule_manager(&self) -> Result<ScheduleManager<Box<dyn CronTable>>> {
        let table: Box<dyn CronTable> = match self.config.schedule.crontab.as_str() {
            "user" => Box::new(UserCrontab),
            path => Box::new(FileCronTable::new(path, Some("root".to_string()))),
        };

        let exe = std::env::current_exe()?;
        let config = self
            .config_path
            .as_ref()
            .map(|path| std::fs::canonicalize(path).unwrap_or_else(|_| path.clone()));
        let command = cron_command(&exe, config.as_deref());
        Ok(ScheduleManager::new(table, command))
    }

    /// Install or replace the cron entry for `class`; returns the entry
    pub fn schedule(&self, class: BackupClass, expr: Option<&str>) -> Result<String> {
        let expr = expr.unwrap_or_else(|| default_expression(&self.config.schedule, class));
        self.schedule_manager()?.schedule(class, expr)
    }

    pub fn unschedule(&self, class: BackupClass) -> Result<bool> {
        self.schedule_manager()?.unschedule(class)
    }

    /// Effective configuration as TOML
    pub fn effective_config(&self) -> Result<String> {
        self.config.to_toml()
    }
}
