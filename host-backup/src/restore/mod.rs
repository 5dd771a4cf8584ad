//! Restore engine.
//!
//! A restore walks `SelectBackupClass -> SelectGeneration -> Confirm -> Execute
//! -> PostCheck`. Only complete generations are ever offered. Unattended runs take
//! the newest generation and skip the confirmation, which is logged as an explicit
//! risk acceptance.

pub mod prompt;

use crate::check::{self, SystemReport};
use crate::config::Config;
use crate::executor::compressor::Compression;
use crate::executor::process::run_tool;
use crate::executor::{rsync_verdict, tar_verdict, ExitVerdict, SNAPSHOT_ROOT};
use crate::fs::ExclusionSet;
use crate::lifecycle::{Elevation, RunContext};
use crate::store::generation::{list_complete, Generation};
use crate::store::record::{FailedMember, GenerationRecord};
use crate::store::BackupClass;
use crate::utils::{BackupError, Result};
use prompt::Prompt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What the operator asked for on the command line
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub class: Option<BackupClass>,
    pub generation: Option<String>,
    /// Take the newest generation without asking
    pub latest: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub class: BackupClass,
    pub generation: PathBuf,
    pub target: PathBuf,
    pub restored: Vec<String>,
    pub failed: Vec<FailedMember>,
    pub check: Option<SystemReport>,
    pub reboot_recommended: bool,
}

enum Stage {
    SelectBackupClass,
    SelectGeneration(BackupClass),
    Confirm(BackupClass, Generation),
    Execute(BackupClass, Generation),
    PostCheck(RestoreOutcome),
}

pub struct RestoreEngine<'a> {
    config: &'a Config,
    ctx: &'a RunContext,
    elevation: Elevation,
    exclusions: ExclusionSet,
}

impl<'a> RestoreEngine<'a> {
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

    fn target(&self) -> &Path {
        &self.config.restore.target
    }

    pub async fn run(
        &self,
        request: &RestoreRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<RestoreOutcome> {
        let mut stage = Stage::SelectBackupClass;
        loop {
            // Answers given after a shutdown signal are not acted on
            if self.ctx.is_cancelled() && !matches!(stage, Stage::PostCheck(_)) {
                return Err(BackupError::Cancelled);
            }
            stage = match stage {
                Stage::SelectBackupClass => {
                    Stage::SelectGeneration(self.select_class(request, prompt)?)
                }
                Stage::SelectGeneration(class) => {
                    let generation = self.select_generation(class, request, prompt)?;
                    Stage::Confirm(class, generation)
                }
                Stage::Confirm(class, generation) => {
                    self.confirm(class, &generation, prompt)?;
                    Stage::Execute(class, generation)
                }
                Stage::Execute(class, generation) => {
                    Stage::PostCheck(self.execute(class, generation).await?)
                }
                Stage::PostCheck(mut outcome) => {
                    let report = check::run(self.config);
                    if !report.is_healthy() {
                        warn!("Post-restore system check found problems");
                    }
                    outcome.check = Some(report);
                    if outcome.reboot_recommended {
                        warn!(target = %outcome.target.display(), "Restore finished, a reboot is recommended");
                    }
                    return Ok(outcome);
                }
            };
        }
    }

    fn select_class(&self, request: &RestoreRequest, prompt: &mut dyn Prompt) -> Result<BackupClass> {
        if let Some(class) = request.class {
            return Ok(class);
        }
        if self.ctx.is_unattended() || request.latest {
            return Ok(BackupClass::Full);
        }

        let classes: Vec<BackupClass> = BackupClass::ALL
            .into_iter()
            .filter(|c| c.destination(self.config).is_some())
            .collect();
        let labels: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        match prompt.choose("Restore from which backup class?", &labels)? {
            Some(idx) => Ok(classes[idx]),
            None => Err(BackupError::RestoreAborted("no backup class selected".to_string())),
        }
    }

    fn select_generation(
        &self,
        class: BackupClass,
        request: &RestoreRequest,
        prompt: &mut dyn Prompt,
    ) -> Result<Generation> {
        let subtree = class.subtree(self.config).ok_or_else(|| {
            BackupError::Config(format!("no destination configured for {} backups", class))
        })?;
        let mut candidates = candidates(&subtree, class)?;
        if candidates.is_empty() {
            return Err(BackupError::NoBackupsFound(subtree));
        }

        if let Some(name) = &request.generation {
            return candidates
                .into_iter()
                .find(|(g, _)| g.name.as_str() == name)
                .map(|(g, _)| g)
                .ok_or_else(|| {
                    BackupError::RestoreAborted(format!(
                        "no complete generation named {} in {}",
                        name,
                        subtree.display()
                    ))
                });
        }

        if self.ctx.is_unattended() || request.latest {
            let (newest, _) = candidates.remove(0);
            info!(generation = %newest.name.as_str(), "Selected newest generation");
            return Ok(newest);
        }

        let labels: Vec<String> = candidates.iter().map(|(g, r)| label(g, r.as_ref())).collect();
        match prompt.choose("Restore which generation? (newest first)", &labels)? {
            Some(idx) => Ok(candidates.swap_remove(idx).0),
            None => Err(BackupError::RestoreAborted("no generation selected".to_string())),
        }
    }

    fn confirm(&self, class: BackupClass, generation: &Generation, prompt: &mut dyn Prompt) -> Result<()> {
        if self.ctx.is_unattended() {
            warn!(
                class = %class,
                generation = %generation.name.as_str(),
                target = %self.target().display(),
                "Unattended restore, overwriting target without confirmation"
            );
            return Ok(());
        }

        let question = format!(
            "Restore {} generation {} onto {}? Existing files will be overwritten",
            class,
            generation.name.as_str(),
            self.target().display()
        );
        if prompt.confirm(&question)? {
            Ok(())
        } else {
            Err(BackupError::RestoreAborted("declined by operator".to_string()))
        }
    }

    async fn execute(&self, class: BackupClass, generation: Generation) -> Result<RestoreOutcome> {
        let target = self.target().to_path_buf();
        if !target.is_dir() {
            return Err(BackupError::Config(format!(
                "restore target {} is not a directory",
                target.display()
            )));
        }
        info!(
            class = %class,
            generation = %generation.path.display(),
            target = %target.display(),
            "Restore started"
        );

        let mut outcome = RestoreOutcome {
            class,
            generation: generation.path.clone(),
            target: target.clone(),
            restored: Vec::new(),
            failed: Vec::new(),
            check: None,
            reboot_recommended: class.is_system_wide(),
        };

        if class.is_archive() {
            for member in generation.members()? {
                self.extract_member(&generation, &member, &target, &mut outcome)
                    .await?;
            }
        } else {
            self.mirror_snapshot(&generation, &target, &mut outcome).await?;
        }

        info!(
            restored = outcome.restored.len(),
            failed = outcome.failed.len(),
            "Restore finished"
        );
        Ok(outcome)
    }

    async fn extract_member(
        &self,
        generation: &Generation,
        member: &str,
        target: &Path,
        outcome: &mut RestoreOutcome,
    ) -> Result<()> {
        let compression = Compression::from_member_name(member).unwrap_or(Compression::None);
        let mut cmd = self.elevation.command("tar");
        cmd.args(["-x", "-p", "--numeric-owner"]);
        cmd.args(compression.tar_args());
        cmd.arg("-f")
            .arg(generation.path.join(member))
            .arg("-C")
            .arg(target);

        let output = run_tool(cmd, None, self.ctx.cancel_token()).await?;
        if tar_verdict(output.code()) == ExitVerdict::Failed {
            error!(
                member = %member,
                exit_status = ?output.code(),
                stderr = %output.stderr,
                "Member could not be restored"
            );
            outcome.failed.push(FailedMember {
                member: member.to_string(),
                exit_status: output.code(),
                detail: output.stderr,
            });
        } else {
            info!(member = %member, "Member restored");
            outcome.restored.push(member.to_string());
        }
        Ok(())
    }

    async fn mirror_snapshot(
        &self,
        generation: &Generation,
        target: &Path,
        outcome: &mut RestoreOutcome,
    ) -> Result<()> {
        let mut cmd = self.elevation.command("rsync");
        cmd.args(["-aH", "--delete", "--numeric-ids"]);
        if self.elevation != Elevation::NotRequired {
            cmd.arg("-AX");
        }
        // Excluded paths on the target are neither overwritten nor deleted
        for pattern in self.exclusions.rsync_patterns(target) {
            cmd.arg(format!("--exclude={}", pattern));
        }
        cmd.arg(format!("{}/", generation.path.join(SNAPSHOT_ROOT).display()))
            .arg(format!("{}/", target.display()));

        let output = run_tool(cmd, None, self.ctx.cancel_token()).await?;
        if rsync_verdict(output.code()) == ExitVerdict::Failed {
            error!(exit_status = ?output.code(), stderr = %output.stderr, "Snapshot restore failed");
            outcome.failed.push(FailedMember {
                member: SNAPSHOT_ROOT.to_string(),
                exit_status: output.code(),
                detail: output.stderr,
            });
        } else {
            outcome.restored.push(SNAPSHOT_ROOT.to_string());
        }
        Ok(())
    }
}

/// Complete generations of `class`, newest first, with their records
fn candidates(subtree: &Path, class: BackupClass) -> Result<Vec<(Generation, Option<GenerationRecord>)>> {
    let mut out = Vec::new();
    for generation in list_complete(subtree)? {
        let record = GenerationRecord::read(&generation.path)?;
        // full/ may be shared by whole-system and home backups
        if record.as_ref().is_some_and(|r| r.class != class) {
            continue;
        }
        out.push((generation, record));
    }
    Ok(out)
}

fn label(generation: &Generation, record: Option<&GenerationRecord>) -> String {
    match record {
        Some(r) => format!(
            "{}  {} members, {} MiB, {}",
            generation.name.as_str(),
            r.members.len(),
            r.total_bytes / (1024 * 1024),
            r.started_at.format("%Y-%m-%d %H:%M")
        ),
        None => generation.name.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::prompt::scripted::ScriptedPrompt;
    use super::*;
    use crate::store::generation::INCOMPLETE_MARKER;
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn config_with(dest: &Path, target: &Path) -> Config {
        let mut config = Config::default();
        config.destinations.system = dest.to_path_buf();
        config.restore.target = target.to_path_buf();
        config
    }

    fn make_generation(subtree: &Path, name: &str, complete: bool) {
        let dir = subtree.join(name);
        fs::create_dir_all(&dir).unwrap();
        if !complete {
            fs::write(dir.join(INCOMPLETE_MARKER), b"").unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_subtree_has_no_backups() {
        let dest = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let config = config_with(dest.path(), target.path());
        let ctx = RunContext::new(true);
        let engine = RestoreEngine::new(&config, &ctx, Elevation::NotRequired, ExclusionSet::default());

        let request = RestoreRequest {
            class: Some(BackupClass::Incremental),
            ..Default::default()
        };
        assert!(matches!(
            engine.run(&request, &mut ScriptedPrompt::default()).await,
            Err(BackupError::NoBackupsFound(_))
        ));
    }

    #[tokio::test]
    async fn test_declined_confirmation_aborts() {
        let dest = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        make_generation(&dest.path().join("full"), "20260101_010101", true);
        let config = config_with(dest.path(), target.path());
        let ctx = RunContext::new(false);
        let engine = RestoreEngine::new(&config, &ctx, Elevation::NotRequired, ExclusionSet::default());

        let mut prompt = ScriptedPrompt::default();
        prompt.choices.push_back(Some(0));
        prompt.confirmations.push_back(false);
        let request = RestoreRequest {
            class: Some(BackupClass::Full),
            ..Default::default()
        };

        assert!(matches!(
            engine.run(&request, &mut prompt).await,
            Err(BackupError::RestoreAborted(_))
        ));
        assert_eq!(prompt.asked.len(), 2);
    }

    /// Confirms, but a shutdown signal arrives while the question is open
    struct InterruptedPrompt(CancellationToken);

    impl Prompt for InterruptedPrompt {
        fn choose(&mut self, _title: &str, _options: &[String]) -> Result<Option<usize>> {
            Ok(Some(0))
        }

        fn confirm(&mut self, _question: &str) -> Result<bool> {
            self.0.cancel();
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_signal_during_confirmation_stops_restore() {
        let dest = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        make_generation(&dest.path().join("full"), "20260101_010101", true);
        let config = config_with(dest.path(), target.path());
        let token = CancellationToken::new();
        let ctx = RunContext::with_cancel(false, token.clone());
        let engine = RestoreEngine::new(&config, &ctx, Elevation::NotRequired, ExclusionSet::default());

        let request = RestoreRequest {
            class: Some(BackupClass::Full),
            ..Default::default()
        };
        assert!(matches!(
            engine.run(&request, &mut InterruptedPrompt(token)).await,
            Err(BackupError::Cancelled)
        ));
        assert_eq!(fs::read_dir(target.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_incomplete_generations_never_offered() {
        let dest = TempDir::new().unwrap();
        let subtree = dest.path().join("full");
        make_generation(&subtree, "20260101_010101", true);
        make_generation(&subtree, "20260102_010101", false);

        let offered = candidates(&subtree, BackupClass::Full).unwrap();
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].0.name.as_str(), "20260101_010101");
    }

    #[test]
    fn test_unattended_selects_newest_without_prompting() {
        let dest = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let subtree = dest.path().join("full");
        make_generation(&subtree, "20260101_010101", true);
        make_generation(&subtree, "20260105_010101", true);
        let config = config_with(dest.path(), target.path());
        let ctx = RunContext::new(true);
        let engine = RestoreEngine::new(&config, &ctx, Elevation::NotRequired, ExclusionSet::default());

        let mut prompt = ScriptedPrompt::default();
        let chosen = engine
            .select_generation(BackupClass::Full, &RestoreRequest::default(), &mut prompt)
            .unwrap();
        assert_eq!(chosen.name.as_str(), "20260105_010101");
        assert!(prompt.asked.is_empty());
    }
}
