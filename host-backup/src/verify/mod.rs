//! Checksum creation and verification of generations.
//!
//! Digests are computed once, when the generation is written, and reused by every
//! later verification. Only a generation without a manifest is hashed on demand.

pub mod manifest;
pub mod transcript;

use crate::store::generation::members_in;
use crate::utils::{BackupError, Result};
use manifest::{sha256_file, Manifest, ManifestEntry};
use rand::seq::SliceRandom;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};
use transcript::{EntryStatus, Transcript, TRANSCRIPT_FILE};

/// Upper bound on the entries a quick verification checks
pub const QUICK_SAMPLE_MAX: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    None,
    /// A small random sample of manifest entries
    Quick,
    /// Every manifest entry, with a transcript
    Full,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerifyMode::None => "none",
            VerifyMode::Quick => "quick",
            VerifyMode::Full => "full",
        })
    }
}

impl FromStr for VerifyMode {
    type Err = BackupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(VerifyMode::None),
            "quick" => Ok(VerifyMode::Quick),
            "full" => Ok(VerifyMode::Full),
            other => Err(BackupError::Config(format!("unknown verify mode '{}'", other))),
        }
    }
}

/// Result of a verification that found no mismatch
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub generation: PathBuf,
    pub mode: VerifyMode,
    pub checked: Vec<String>,
    /// The manifest was missing and had to be generated first
    pub manifest_generated: bool,
    pub transcript: Option<PathBuf>,
}

/// Post-backup verification result; a failure is reported, never acted on
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Skipped,
    Passed(VerifyReport),
    Failed(String),
}

impl VerifyOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, VerifyOutcome::Failed(_))
    }
}

/// Run `verify` and fold the result into a [`VerifyOutcome`]
pub async fn verify_after_backup(generation: &Path, mode: VerifyMode, sample_size: usize) -> VerifyOutcome {
    if mode == VerifyMode::None {
        return VerifyOutcome::Skipped;
    }
    match verify(generation, mode, sample_size).await {
        Ok(report) => VerifyOutcome::Passed(report),
        Err(e) => {
            error!(generation = %generation.display(), error = %e, "Post-backup verification failed");
            VerifyOutcome::Failed(e.to_string())
        }
    }
}

/// Hash every archive member and write the manifest
pub async fn create_checksums(generation: &Path) -> Result<Manifest> {
    let dir = generation.to_path_buf();
    tokio::task::spawn_blocking(move || create_checksums_blocking(&dir))
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))?
}

fn create_checksums_blocking(generation: &Path) -> Result<Manifest> {
    let members = members_in(generation)?;

    let mut entries = Vec::with_capacity(members.len());
    for member in members {
        let digest = sha256_file(&generation.join(&member))?;
        entries.push(ManifestEntry {
            digest,
            path: member,
        });
    }

    let manifest = Manifest { entries };
    manifest.write(generation)?;
    info!(
        generation = %generation.display(),
        members = manifest.entries.len(),
        "Checksums written"
    );
    Ok(manifest)
}

/// Check a generation against its manifest
pub async fn verify(generation: &Path, mode: VerifyMode, sample_size: usize) -> Result<VerifyReport> {
    if mode == VerifyMode::None {
        return Ok(VerifyReport {
            generation: generation.to_path_buf(),
            mode,
            checked: Vec::new(),
            manifest_generated: false,
            transcript: None,
        });
    }

    let (manifest, manifest_generated) = match Manifest::read(generation)? {
        Some(m) => (m, false),
        None => {
            warn!(
                generation = %generation.display(),
                "No manifest found, hashing members now (slow path)"
            );
            (create_checksums(generation).await?, true)
        }
    };

    let selected: Vec<ManifestEntry> = match mode {
        VerifyMode::Quick => sample(&manifest.entries, sample_size),
        _ => manifest.entries.clone(),
    };

    let dir = generation.to_path_buf();
    let statuses = tokio::task::spawn_blocking(move || check_entries(&dir, &selected))
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))?;

    let transcript = Transcript::from_statuses(&statuses);
    let failed = transcript.failed();
    let checked: Vec<String> = statuses.into_iter().map(|(path, _)| path).collect();

    let transcript_path = if mode == VerifyMode::Full {
        let path = generation.join(TRANSCRIPT_FILE);
        std::fs::write(&path, transcript.render())?;
        Some(path)
    } else {
        None
    };

    if !failed.is_empty() {
        return Err(match mode {
            VerifyMode::Quick => BackupError::QuickVerifyFailed {
                generation: generation.to_path_buf(),
                failed,
            },
            _ => BackupError::VerifyFailed {
                generation: generation.to_path_buf(),
                failed,
            },
        });
    }

    info!(
        generation = %generation.display(),
        mode = %mode,
        checked = checked.len(),
        "Verification passed"
    );
    Ok(VerifyReport {
        generation: generation.to_path_buf(),
        mode,
        checked,
        manifest_generated,
        transcript: transcript_path,
    })
}

/// At most `n` entries, never more than [`QUICK_SAMPLE_MAX`]; random when there
/// are more
fn sample(entries: &[ManifestEntry], n: usize) -> Vec<ManifestEntry> {
    let n = n.clamp(1, QUICK_SAMPLE_MAX);
    if entries.len() <= n {
        return entries.to_vec();
    }
    let mut rng = rand::thread_rng();
    entries.choose_multiple(&mut rng, n).cloned().collect()
}

fn check_entries(generation: &Path, entries: &[ManifestEntry]) -> Vec<(String, EntryStatus)> {
    entries
        .iter()
        .map(|entry| {
            let status = match sha256_file(&generation.join(&entry.path)) {
                Ok(digest) if digest == entry.digest => EntryStatus::Ok,
                Ok(_) => EntryStatus::Mismatch,
                Err(_) => EntryStatus::Unreadable,
            };
            if status != EntryStatus::Ok {
                warn!(generation = %generation.display(), member = %entry.path, "Checksum mismatch");
            }
            (entry.path.clone(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn generation_with(members: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, body) in members {
            fs::write(temp.path().join(name), body).unwrap();
        }
        fs::write(temp.path().join("RESTORE.txt"), b"instructions").unwrap();
        temp
    }

    fn corrupt(path: &Path) {
        let mut bytes = fs::read(path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_manifest_lists_members_only() {
        let gen = generation_with(&[("b.tar", "bbb"), ("a.tar.gz", "aaa")]);
        let manifest = create_checksums(gen.path()).await.unwrap();

        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.tar.gz", "b.tar"]);

        // Same members, same manifest
        let again = create_checksums(gen.path()).await.unwrap();
        assert_eq!(manifest, again);
    }

    #[tokio::test]
    async fn test_full_verify_names_the_corrupted_member() {
        let gen = generation_with(&[("etc.tar", "etc contents"), ("usr.tar", "usr contents")]);
        create_checksums(gen.path()).await.unwrap();

        let report = verify(gen.path(), VerifyMode::Full, 5).await.unwrap();
        assert_eq!(report.checked.len(), 2);
        assert!(!report.manifest_generated);

        corrupt(&gen.path().join("usr.tar"));
        match verify(gen.path(), VerifyMode::Full, 5).await {
            Err(BackupError::VerifyFailed { failed, .. }) => assert_eq!(failed, vec!["usr.tar"]),
            other => panic!("expected VerifyFailed, got {:?}", other),
        }

        let log = fs::read_to_string(gen.path().join(TRANSCRIPT_FILE)).unwrap();
        assert_eq!(log.matches("FAILED").count(), 1);
        assert!(log.contains("usr.tar: FAILED"));
        assert!(log.contains("etc.tar: OK"));
    }

    #[tokio::test]
    async fn test_member_with_newline_in_name_verifies() {
        let gen = generation_with(&[("a\nb.tar", "odd"), ("c.tar", "plain")]);
        create_checksums(gen.path()).await.unwrap();

        let manifest = Manifest::read(gen.path()).unwrap().unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[0].path, "a\nb.tar");

        let report = verify(gen.path(), VerifyMode::Full, 5).await.unwrap();
        assert_eq!(report.checked.len(), 2);

        corrupt(&gen.path().join("a\nb.tar"));
        match verify(gen.path(), VerifyMode::Full, 5).await {
            Err(BackupError::VerifyFailed { failed, .. }) => assert_eq!(failed, vec!["a\nb.tar"]),
            other => panic!("expected VerifyFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quick_verify_samples_at_most_five() {
        let names: Vec<String> = (0..12).map(|i| format!("m{:02}.tar", i)).collect();
        let members: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), n.as_str())).collect();
        let gen = generation_with(&members);
        create_checksums(gen.path()).await.unwrap();

        let report = verify(gen.path(), VerifyMode::Quick, 5).await.unwrap();
        assert_eq!(report.checked.len(), 5);
        assert!(report.transcript.is_none());
    }

    #[tokio::test]
    async fn test_quick_verify_caps_a_larger_sample_size() {
        let names: Vec<String> = (0..12).map(|i| format!("m{:02}.tar", i)).collect();
        let members: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), n.as_str())).collect();
        let gen = generation_with(&members);
        create_checksums(gen.path()).await.unwrap();

        let report = verify(gen.path(), VerifyMode::Quick, 10).await.unwrap();
        assert_eq!(report.checked.len(), QUICK_SAMPLE_MAX);

        let report = verify(gen.path(), VerifyMode::Quick, 2).await.unwrap();
        assert_eq!(report.checked.len(), 2);
    }

    #[tokio::test]
    async fn test_quick_verify_never_passes_sampled_corruption() {
        let gen = generation_with(&[("a.tar", "a"), ("b.tar", "b"), ("c.tar", "c")]);
        create_checksums(gen.path()).await.unwrap();
        corrupt(&gen.path().join("b.tar"));

        // Three entries: all of them are in the sample
        assert!(matches!(
            verify(gen.path(), VerifyMode::Quick, 5).await,
            Err(BackupError::QuickVerifyFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_manifest_generated_on_demand() {
        let gen = generation_with(&[("home.tar", "home")]);
        let report = verify(gen.path(), VerifyMode::Full, 5).await.unwrap();
        assert!(report.manifest_generated);
        assert!(gen.path().join(manifest::MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_missing_member_fails() {
        let gen = generation_with(&[("a.tar", "a"), ("b.tar", "b")]);
        create_checksums(gen.path()).await.unwrap();
        fs::remove_file(gen.path().join("a.tar")).unwrap();

        match verify(gen.path(), VerifyMode::Full, 5).await {
            Err(BackupError::VerifyFailed { failed, .. }) => assert_eq!(failed, vec!["a.tar"]),
            other => panic!("expected VerifyFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_backup_failure_is_reported_not_raised() {
        let gen = generation_with(&[("a.tar", "a")]);
        create_checksums(gen.path()).await.unwrap();
        corrupt(&gen.path().join("a.tar"));

        let outcome = verify_after_backup(gen.path(), VerifyMode::Quick, 5).await;
        assert!(outcome.is_failed());
        assert!(gen.path().join("a.tar").exists());
        assert!(matches!(
            verify_after_backup(gen.path(), VerifyMode::None, 5).await,
            VerifyOutcome::Skipped
        ));
    }

    #[tokio::test]
    async fn test_none_mode_trivially_passes() {
        let gen = generation_with(&[]);
        let report = verify(gen.path(), VerifyMode::None, 5).await.unwrap();
        assert!(report.checked.is_empty());
        assert!(!gen.path().join(manifest::MANIFEST_FILE).exists());
    }
}
