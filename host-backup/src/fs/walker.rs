//! Directory traversal over a live filesystem.
//!
//! Entries that vanish or cannot be read while walking are logged and skipped:
//! the tree being archived keeps changing underneath us.

use crate::fs::exclusions::ExclusionSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Symlinks are never followed; excluded subtrees are never entered
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub exclusions: ExclusionSet,
}

impl WalkOptions {
    pub fn excluding(exclusions: ExclusionSet) -> Self {
        Self { exclusions }
    }
}

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileInfo {
    /// Returns None for anything that is not a regular file
    fn regular(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        if !entry.file_type().is_file() {
            return Ok(None);
        }
        let meta = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Some(Self {
            path,
            relative_path,
            size: meta.len(),
            modified: meta.modified()?,
        }))
    }
}

/// Visit every regular file under `root`
pub fn for_each_file(
    root: &Path,
    options: &WalkOptions,
    mut visit: impl FnMut(FileInfo),
) -> std::io::Result<()> {
    if !root.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", root.display()),
        ));
    }

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !options.exclusions.covers(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        match FileInfo::regular(&entry, root) {
            Ok(Some(info)) => visit(info),
            Ok(None) => {}
            Err(e) => debug!(path = %entry.path().display(), error = %e, "Entry vanished while walking"),
        }
    }

    Ok(())
}

/// Regular files modified strictly after `boundary`
pub fn changed_since(
    root: &Path,
    boundary: SystemTime,
    options: &WalkOptions,
) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    for_each_file(root, options, |f| {
        if f.modified > boundary {
            files.push(f);
        }
    })?;
    Ok(files)
}

/// Sum of regular file sizes under `root`
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for_each_file(root, &WalkOptions::default(), |f| total += f.size)?;
    Ok(total)
}

/// Immediate children of `root`, sorted by name
pub fn top_level_entries(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn all_files(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
        changed_since(root, SystemTime::UNIX_EPOCH, options)
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(all_files(&temp.path().join("gone"), &WalkOptions::default()).is_err());
    }

    #[test]
    fn test_nested_files_found() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("a/b"))?;
        fs::write(temp.path().join("top"), b"1")?;
        fs::write(temp.path().join("a/b/deep"), b"2")?;

        let mut found: Vec<_> = all_files(temp.path(), &WalkOptions::default())?
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        found.sort();
        assert_eq!(found, vec![PathBuf::from("a/b/deep"), PathBuf::from("top")]);
        Ok(())
    }

    #[test]
    fn test_snapshot_size_counts_regular_files() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("five"), b"12345")?;
        fs::write(temp.path().join("seven"), b"1234567")?;
        std::os::unix::fs::symlink(temp.path().join("five"), temp.path().join("link"))?;

        assert_eq!(calculate_total_size(temp.path())?, 12);
        Ok(())
    }

    #[test]
    fn test_excluded_subtree_not_entered() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = temp_dir.path().join("cache");
        fs::create_dir(&cache)?;
        fs::write(cache.join("blob"), b"skip")?;
        fs::write(temp_dir.path().join("keep.txt"), b"keep")?;

        let options =
            WalkOptions::excluding(ExclusionSet::build(&[cache.clone()], std::iter::empty()));
        let files = all_files(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("keep.txt"));

        Ok(())
    }

    #[test]
    fn test_changed_since_is_strict() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"a")?;
        let mtime = fs::metadata(&path)?.modified()?;

        let none = changed_since(temp_dir.path(), mtime, &WalkOptions::default())?;
        assert!(none.is_empty());

        let all = changed_since(
            temp_dir.path(),
            mtime - Duration::from_secs(1),
            &WalkOptions::default(),
        )?;
        assert_eq!(all.len(), 1);

        Ok(())
    }

    #[test]
    fn test_top_level_entries_sorted() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("usr"))?;
        fs::create_dir(temp_dir.path().join("etc"))?;
        fs::write(temp_dir.path().join("vmlinuz"), b"")?;

        let names: Vec<_> = top_level_entries(temp_dir.path())?
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["etc", "usr", "vmlinuz"]);

        Ok(())
    }
}
