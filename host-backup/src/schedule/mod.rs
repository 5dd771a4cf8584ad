//! Scheduled backups in cron.
//!
//! Everything this tool adds to a crontab lives in one delimited block. The
//! block is rebuilt from scratch on every change, so scheduling the same class
//! twice leaves exactly one entry and text outside the block is never touched.

pub mod crontab;

use crate::config::ScheduleConfig;
use crate::store::BackupClass;
use crate::utils::{BackupError, Result};
use crontab::CronTable;
use std::path::Path;
use tracing::info;

pub const BLOCK_BEGIN: &str = "# BEGIN host-backup managed block";
pub const BLOCK_END: &str = "# END host-backup managed block";
const TAG_PREFIX: &str = "# host-backup:";

const CRON_MACROS: [&str; 8] = [
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Reject anything that is not five cron fields or an `@` macro
pub fn validate_expression(expr: &str) -> Result<()> {
    let expr = expr.trim();
    if expr.starts_with('@') {
        return if CRON_MACROS.contains(&expr) {
            Ok(())
        } else {
            Err(BackupError::InvalidSchedule(expr.to_string()))
        };
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let valid_field = |f: &&str| {
        f.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/'))
    };
    if fields.len() == 5 && fields.iter().all(valid_field) {
        Ok(())
    } else {
        Err(BackupError::InvalidSchedule(expr.to_string()))
    }
}

/// Configured expression for `class`
pub fn default_expression(config: &ScheduleConfig, class: BackupClass) -> &str {
    match class {
        BackupClass::Full => &config.full,
        BackupClass::Incremental => &config.incremental,
        BackupClass::Snapshot => &config.snapshot,
        BackupClass::Home => &config.home,
    }
}

/// Command line cron runs; each entry appends its class
pub fn cron_command(exe: &Path, config: Option<&Path>) -> String {
    let mut command = format!("{} --unattended", shell_quote(&exe.to_string_lossy()));
    if let Some(path) = config {
        command.push_str(" --config ");
        command.push_str(&shell_quote(&path.to_string_lossy()));
    }
    command.push_str(" backup");
    command
}

/// One shell word. Cron turns a bare `%` into a newline, so it is always
/// escaped.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | ',' | '=')
        });
    let quoted = if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    };
    quoted.replace('%', "\\%")
}

/// Class a managed line belongs to, from its trailing tag
fn tagged_class(line: &str) -> Option<BackupClass> {
    let (_, tag) = line.rsplit_once(TAG_PREFIX)?;
    tag.trim().parse().ok()
}

/// Split a crontab into the lines outside the managed block and the lines
/// inside it. Every block is consumed; a block without an end delimiter runs
/// to the end of the table.
fn split_block(contents: &str) -> (Vec<&str>, Vec<&str>) {
    let mut outside = Vec::new();
    let mut inside = Vec::new();
    let mut in_block = false;

    for line in contents.lines() {
        match line.trim() {
            BLOCK_BEGIN => in_block = true,
            BLOCK_END => in_block = false,
            _ if in_block => inside.push(line),
            _ => outside.push(line),
        }
    }
    (outside, inside)
}

pub struct ScheduleManager<T: CronTable> {
    table: T,
    /// Command line that runs one backup, the class is appended
    command: String,
}

impl<T: CronTable> ScheduleManager<T> {
    pub fn new(table: T, command: impl Into<String>) -> Self {
        Self {
            table,
            command: command.into(),
        }
    }

    /// Managed entries currently in the table
    pub fn entries(&self) -> Result<Vec<(BackupClass, String)>> {
        let contents = self.table.read()?;
        let (_, inside) = split_block(&contents);
        Ok(inside
            .into_iter()
            .filter_map(|line| tagged_class(line).map(|c| (c, line.to_string())))
            .collect())
    }

    /// Replace the managed block with exactly `lines`; an empty list removes it
    pub fn upsert(&self, lines: &[String]) -> Result<()> {
        let contents = self.table.read()?;
        let (outside, _) = split_block(&contents);

        let mut out: Vec<&str> = outside;
        while out.last().is_some_and(|l| l.trim().is_empty()) {
            out.pop();
        }
        let mut rendered = out.join("\n");
        if !rendered.is_empty() {
            rendered.push('\n');
        }

        if !lines.is_empty() {
            rendered.push_str(BLOCK_BEGIN);
            rendered.push('\n');
            for line in lines {
                rendered.push_str(line);
                rendered.push('\n');
            }
            rendered.push_str(BLOCK_END);
            rendered.push('\n');
        }

        self.table.write(&rendered)
    }

    /// Add or replace the entry for `class`
    pub fn schedule(&self, class: BackupClass, expr: &str) -> Result<String> {
        validate_expression(expr)?;
        let line = self.render(class, expr.trim());

        let mut lines: Vec<String> = self
            .entries()?
            .into_iter()
            .filter(|(c, _)| *c != class)
            .map(|(_, l)| l)
            .collect();
        lines.push(line.clone());
        lines.sort_by_key(|l| tagged_class(l).map(|c| c.as_str()));

        self.upsert(&lines)?;
        info!(class = %class, schedule = %expr, "Backup scheduled");
        Ok(line)
    }

    /// Drop the entry for `class`; returns whether one existed
    pub fn unschedule(&self, class: BackupClass) -> Result<bool> {
        let entries = self.entries()?;
        let existed = entries.iter().any(|(c, _)| *c == class);
        let lines: Vec<String> = entries
            .into_iter()
            .filter(|(c, _)| *c != class)
            .map(|(_, l)| l)
            .collect();

        self.upsert(&lines)?;
        if existed {
            info!(class = %class, "Backup unscheduled");
        }
        Ok(existed)
    }

    fn render(&self, class: BackupClass, expr: &str) -> String {
        match self.table.user_field() {
            Some(user) => format!(
                "{} {} {} {} {}{}",
                expr, user, self.command, class, TAG_PREFIX, class
            ),
            None => format!("{} {} {} {}{}", expr, self.command, class, TAG_PREFIX, class),
        }
    }
}
