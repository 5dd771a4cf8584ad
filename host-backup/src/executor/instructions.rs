//! `RESTORE.txt`, written into every generation.
//!
//! The file lets an operator restore by hand without this tool installed.

use crate::executor::compressor::Compression;
use crate::store::record::write_atomic;
use crate::store::BackupClass;
use crate::utils::Result;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::Path;

pub const INSTRUCTIONS_FILE: &str = "RESTORE.txt";

pub struct RestoreInstructions<'a> {
    pub host: &'a str,
    pub class: BackupClass,
    pub generation: &'a str,
    pub created: DateTime<Local>,
    /// Directory the members were archived relative to
    pub root: &'a Path,
    pub members: &'a [String],
    pub failed: &'a [String],
}

impl RestoreInstructions<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "host-backup restore instructions");
        let _ = writeln!(out, "================================");
        let _ = writeln!(out, "Host:       {}", self.host);
        let _ = writeln!(out, "Class:      {}", self.class);
        let _ = writeln!(out, "Generation: {}", self.generation);
        let _ = writeln!(out, "Created:    {}", self.created.format("%Y-%m-%d %H:%M:%S %z"));
        out.push('\n');

        let root = self.root.display();
        if self.class.is_archive() {
            let _ = writeln!(out, "1. Check integrity from inside this directory:");
            let _ = writeln!(out, "     sha256sum -c SHA256SUMS");
            out.push('\n');
            let _ = writeln!(out, "2. Extract each member onto the target (here: {}):", root);
            for member in self.members {
                let args = Compression::from_member_name(member)
                    .map(|c| c.tar_args().join(" "))
                    .unwrap_or_default();
                let flags = if args.is_empty() {
                    String::new()
                } else {
                    format!(" {}", args)
                };
                let _ = writeln!(
                    out,
                    "     sudo tar -x -p --numeric-owner{} -f {} -C {}",
                    flags, member, root
                );
            }
            if self.members.is_empty() {
                let _ = writeln!(out, "     (no members)");
            }
        } else {
            let dest = if self.root == Path::new("/") {
                "/".to_string()
            } else {
                format!("{}/", root)
            };
            let _ = writeln!(out, "1. Mirror the snapshot back onto the target (here: {}):", root);
            let _ = writeln!(
                out,
                "     sudo rsync -aHAX --delete {}/root/ {}",
                self.generation, dest
            );
            let _ = writeln!(out, "   Add --exclude for the backup destination if it lives under {}.", root);
        }

        if !self.failed.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "WARNING: these members failed and are not in this generation:");
            for member in self.failed {
                let _ = writeln!(out, "     {}", member);
            }
        }

        out.push('\n');
        let _ = writeln!(out, "Reboot after restoring system files.");
        out
    }

    pub fn write(&self, generation: &Path) -> Result<()> {
        write_atomic(&generation.join(INSTRUCTIONS_FILE), self.render().as_bytes())
    }
}
