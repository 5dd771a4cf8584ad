//! Verification transcript, `verify.log`.
//!
//! Lines follow `sha256sum -c` output (`<path>: OK`, `<path>: FAILED`) so an
//! operator can compare it with a manual check. Awkward names are escaped as
//! in the manifest. [`failed_entries`] is the only place that reads the text
//! back.

use super::manifest::{escape_name, needs_escape, unescape_name};

pub const TRANSCRIPT_FILE: &str = "verify.log";

const FAILED_MARKER: &str = "FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Ok,
    Mismatch,
    Unreadable,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn from_statuses(statuses: &[(String, EntryStatus)]) -> Self {
        let lines = statuses
            .iter()
            .map(|(path, status)| {
                let path = if needs_escape(path) {
                    format!("\\{}", escape_name(path))
                } else {
                    path.clone()
                };
                match status {
                    EntryStatus::Ok => format!("{}: OK", path),
                    EntryStatus::Mismatch => format!("{}: {}", path, FAILED_MARKER),
                    EntryStatus::Unreadable => {
                        format!("{}: {} open or read", path, FAILED_MARKER)
                    }
                }
            })
            .collect();
        Self { lines }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn failed(&self) -> Vec<String> {
        failed_entries(&self.render())
    }
}

/// Paths reported as failed in a `sha256sum -c` style transcript
pub fn failed_entries(transcript: &str) -> Vec<String> {
    transcript
        .lines()
        .filter_map(|line| {
            let (path, verdict) = line.rsplit_once(": ")?;
            if !verdict.starts_with(FAILED_MARKER) {
                return None;
            }
            match path.strip_prefix('\\') {
                Some(escaped) => unescape_name(escaped),
                None => Some(path.to_string()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_tool_output() {
        let raw = "etc.tar.gz: OK\n\
                   usr.tar.gz: FAILED\n\
                   var.tar.gz: FAILED open or read\n\
                   sha256sum: WARNING: 1 computed checksum did NOT match\n";

        assert_eq!(failed_entries(raw), vec!["usr.tar.gz", "var.tar.gz"]);
    }

    #[test]
    fn test_member_names_containing_separator() {
        let t = Transcript::from_statuses(&[
            ("odd: name.tar".to_string(), EntryStatus::Mismatch),
            ("fine.tar".to_string(), EntryStatus::Ok),
        ]);
        assert_eq!(t.failed(), vec!["odd: name.tar"]);
        assert!(t.render().ends_with("fine.tar: OK\n"));
    }

    #[test]
    fn test_newline_in_name_stays_on_one_line() {
        let t = Transcript::from_statuses(&[
            ("a\nb.tar".to_string(), EntryStatus::Mismatch),
            ("c.tar".to_string(), EntryStatus::Ok),
        ]);
        assert_eq!(t.render().lines().count(), 2);
        assert!(t.render().starts_with("\\a\\nb.tar: FAILED\n"));
        assert_eq!(t.failed(), vec!["a\nb.tar"]);
    }

    #[test]
    fn test_clean_transcript() {
        let t = Transcript::from_statuses(&[("a.tar".to_string(), EntryStatus::Ok)]);
        assert!(t.failed().is_empty());
    }
}
