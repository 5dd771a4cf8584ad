//! Host Backup - Main entry point

use clap::{Parser, Subcommand};
use host_backup::lifecycle::{RunContext, ShutdownCoordinator};
use host_backup::restore::prompt::StdinPrompt;
use host_backup::restore::RestoreRequest;
use host_backup::verify::{VerifyMode, VerifyOutcome};
use host_backup::{utils, BackupClass, Config, Orchestrator};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "/etc/host-backup/config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Never prompt; fail when a decision or a password would be needed
    #[arg(long, global = true)]
    unattended: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup generation (full, incremental, snapshot, home)
    Backup { class: BackupClass },

    /// Check destinations, tools and backup freshness
    Check,

    /// Restore a generation onto the configured target
    Restore {
        #[arg(long)]
        class: Option<BackupClass>,
        /// Generation name, e.g. 20260101_030000
        #[arg(long)]
        generation: Option<String>,
        /// Use the newest generation without asking
        #[arg(long)]
        latest: bool,
    },

    /// Verify a generation against its checksums
    Verify {
        #[arg(long, default_value = "full")]
        class: BackupClass,
        #[arg(long)]
        generation: Option<String>,
        #[arg(long, default_value = "full")]
        mode: VerifyMode,
    },

    /// List generations
    List {
        #[arg(long)]
        class: Option<BackupClass>,
    },

    /// Install or replace the cron entry for a backup class
    Schedule {
        class: BackupClass,
        /// Cron expression; defaults to the configured one
        #[arg(long)]
        cron: Option<String>,
    },

    /// Remove the cron entry for a backup class
    Unschedule { class: BackupClass },

    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&Path>) -> host_backup::Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("host-backup: {}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level, config.log.file.as_deref()) {
        eprintln!("host-backup: cannot initialize logging: {}", e);
        return ExitCode::from(1);
    }

    let token = CancellationToken::new();
    let ctx = Arc::new(RunContext::with_cancel(args.unattended, token.clone()));
    tracing::info!(
        "Starting host-backup v{} (run {})",
        env!("CARGO_PKG_VERSION"),
        ctx.run_id()
    );

    let orchestrator =
        Orchestrator::new(Arc::new(config), ctx.clone()).with_config_path(args.config.clone());

    // A signal cancels the token; the running operation stops its child and returns
    let shutdown_coordinator = ShutdownCoordinator::new(token.clone());
    let signal_handle = tokio::spawn(async move { shutdown_coordinator.wait_for_signal().await });

    let result = dispatch(&orchestrator, args.command).await;

    let signal = if token.is_cancelled() {
        signal_handle.await.ok()
    } else {
        signal_handle.abort();
        None
    };
    ctx.cleanup();

    if let Some(signal) = signal {
        tracing::warn!(signal = ?signal, "Run interrupted, partial output removed");
        return ExitCode::from(signal.exit_code() as u8);
    }

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Operation failed");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(orchestrator: &Orchestrator, command: Command) -> host_backup::Result<ExitCode> {
    match command {
        Command::Backup { class } => {
            let outcome = orchestrator.backup(class).await?;
            let Some(generation) = &outcome.generation else {
                println!("No changes since the last {} backup", class);
                return Ok(ExitCode::SUCCESS);
            };

            println!("Generation: {}", generation.display());
            println!(
                "Members:    {} written, {} failed, {} bytes",
                outcome.members.len(),
                outcome.failed.len(),
                outcome.total_bytes
            );
            for failed in &outcome.failed {
                println!("  FAILED {} (exit {:?})", failed.member, failed.exit_status);
            }
            if outcome.shrink_warning {
                println!("WARNING: backup is much smaller than the previous one");
            }
            if !outcome.removed_by_retention.is_empty() {
                println!("Retention removed: {}", outcome.removed_by_retention.join(", "));
            }
            match &outcome.verification {
                Some(VerifyOutcome::Passed(report)) => {
                    println!("Verification ({}): {} entries OK", report.mode, report.checked.len())
                }
                Some(VerifyOutcome::Failed(reason)) => println!("Verification FAILED: {}", reason),
                Some(VerifyOutcome::Skipped) | None => {}
            }

            let verify_failed = outcome.verification.as_ref().is_some_and(|v| v.is_failed());
            if outcome.failed.is_empty() && !verify_failed {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }

        Command::Check => {
            let report = orchestrator.check();
            print!("{}", report.render());
            Ok(if report.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Restore {
            class,
            generation,
            latest,
        } => {
            let request = RestoreRequest {
                class,
                generation,
                latest,
            };
            let mut prompt = StdinPrompt::new(orchestrator.context().cancel_token().clone());
            let outcome = orchestrator.restore(&request, &mut prompt).await?;
            println!(
                "Restored {} onto {}: {} ok, {} failed",
                outcome.generation.display(),
                outcome.target.display(),
                outcome.restored.len(),
                outcome.failed.len()
            );
            for failed in &outcome.failed {
                println!("  FAILED {} (exit {:?})", failed.member, failed.exit_status);
            }
            if let Some(report) = &outcome.check {
                print!("{}", report.render());
            }
            if outcome.reboot_recommended {
                println!("A reboot is recommended.");
            }
            Ok(if outcome.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Verify {
            class,
            generation,
            mode,
        } => {
            let report = orchestrator
                .verify(class, generation.as_deref(), mode)
                .await?;
            println!(
                "{}: {} entries OK ({})",
                report.generation.display(),
                report.checked.len(),
                report.mode
            );
            if report.manifest_generated {
                println!("Manifest was missing and has been generated");
            }
            if let Some(transcript) = &report.transcript {
                println!("Transcript: {}", transcript.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::List { class } => {
            for row in orchestrator.list(class)? {
                let size = row
                    .total_bytes
                    .map(|b| format!("{} MiB", b / (1024 * 1024)))
                    .unwrap_or_else(|| "-".to_string());
                let state = if !row.complete {
                    "INCOMPLETE".to_string()
                } else if !row.failed_verification.is_empty() {
                    format!("VERIFY FAILED: {}", row.failed_verification.join(", "))
                } else {
                    "ok".to_string()
                };
                println!(
                    "{:<12} {:<20} {:>4} members {:>10}  {}",
                    row.class.as_str(),
                    row.name,
                    row.members,
                    size,
                    state
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Schedule { class, cron } => {
            let line = orchestrator.schedule(class, cron.as_deref())?;
            println!("{}", line);
            Ok(ExitCode::SUCCESS)
        }

        Command::Unschedule { class } => {
            if orchestrator.unschedule(class)? {
                println!("Removed scheduled {} backup", class);
            } else {
                println!("No scheduled {} backup", class);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Config => {
            print!("{}", orchestrator.effective_config()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
