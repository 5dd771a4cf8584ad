//! Paths omitted from every archive operation.
//!
//! The set is the static exclusion list followed by every backup destination, so a
//! backup never archives itself. It is rebuilt from the configuration before each
//! operation instead of being cached.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    paths: Vec<PathBuf>,
}

impl ExclusionSet {
    /// Merge the static list with the destination paths.
    ///
    /// Order of the static list is kept as-is (duplicates included); a destination
    /// is appended only if it is not already listed.
    pub fn build<'a>(
        static_paths: &[PathBuf],
        destinations: impl IntoIterator<Item = &'a Path>,
    ) -> Self {
        let mut paths = static_paths.to_vec();
        for dest in destinations {
            if !paths.iter().any(|p| p == dest) {
                paths.push(dest.to_path_buf());
            }
        }
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Exact match, used for top-level entries of a whole-system backup
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// True if `path` is an excluded path or lies below one
    pub fn covers(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| path.starts_with(p))
    }

    /// Exclusions strictly below `entry`, rewritten relative to `root`.
    ///
    /// These become `--exclude` arguments for tar or rsync invocations that run
    /// with `root` as their working directory.
    pub fn patterns_under(&self, root: &Path, entry: &Path) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| p.starts_with(entry) && p.as_path() != entry)
            .filter_map(|p| p.strip_prefix(root).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .collect()
    }

    /// Exclusions below `root` as anchored rsync patterns (`/var/cache`)
    pub fn rsync_patterns(&self, root: &Path) -> Vec<String> {
        self.paths
            .iter()
            .filter_map(|p| p.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| format!("/{}", rel.to_string_lossy()))
            .collect()
    }
}
