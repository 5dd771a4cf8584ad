//! Generation retention.

use crate::store::generation::{list_generations, Generation};
use crate::store::record::GenerationRecord;
use crate::store::BackupClass;
use crate::utils::{BackupError, Result};
use std::path::Path;
use tracing::info;

/// Keep the newest `keep` generations under `subtree` and delete the rest.
///
/// Only directories whose names parse as generation names are considered, so
/// unrelated directories next to them survive. Returns the removed names.
pub fn keep_newest(subtree: &Path, keep: usize) -> Result<Vec<String>> {
    prune(subtree, keep, |_| true)
}

/// Like [`keep_newest`], counting only generations recorded as `class`.
///
/// `full/` can hold whole-system and home generations side by side; each class
/// keeps its own count. Generations without a readable record count as `class`.
pub fn keep_newest_of(subtree: &Path, class: BackupClass, keep: usize) -> Result<Vec<String>> {
    prune(subtree, keep, |generation| {
        GenerationRecord::read(&generation.path)
            .ok()
            .flatten()
            .map_or(true, |record| record.class == class)
    })
}

fn prune(subtree: &Path, keep: usize, owned: impl Fn(&Generation) -> bool) -> Result<Vec<String>> {
    let generations = list_generations(subtree).map_err(|e| match e {
        BackupError::Io(source) => BackupError::RetentionFailed {
            path: subtree.to_path_buf(),
            source,
        },
        other => other,
    })?;

    let mut removed = Vec::new();
    for old in generations.into_iter().filter(|g| owned(g)).skip(keep) {
        std::fs::remove_dir_all(&old.path).map_err(|source| BackupError::RetentionFailed {
            path: old.path.clone(),
            source,
        })?;
        info!(generation = %old.path.display(), "Removed old generation");
        removed.push(old.name.as_str().to_string());
    }

    if !removed.is_empty() {
        info!(subtree = %subtree.display(), kept = keep, removed = removed.len(), "Retention applied");
    }
    Ok(removed)
}
