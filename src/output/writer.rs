// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Plan file writing: backup-on-overwrite with bounded backup history.
//!
//! Every overwrite snapshots the previous plan to a timestamped sibling
//! (`plan.md.20260801T103000.bak`). Timestamps sort lexicographically, so
//! pruning works on file names alone and needs no metadata reads.

use crate::utils::error::PlanweaveError;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Backup snapshots kept per output file.
const BACKUP_KEEP: usize = 5;

/// What happened when the plan was written.
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub path: PathBuf,
    pub is_new: bool,
    pub backup_path: Option<PathBuf>,
}

/// Write the plan markdown to `path`, backing up an existing file first.
pub fn write_plan(path: &Path, plan: &str) -> Result<WriteResult, PlanweaveError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let existed = path.exists();
    let backup_path = if existed {
        let snapshot = snapshot_existing(path)?;
        prune_snapshots(path, BACKUP_KEEP)?;
        Some(snapshot)
    } else {
        None
    };

    std::fs::write(path, plan)?;
    tracing::info!(path = %path.display(), bytes = plan.len(), "Plan written");

    Ok(WriteResult {
        path: path.to_path_buf(),
        is_new: !existed,
        backup_path,
    })
}

/// Copy the current file to `<name>.<timestamp>.bak`, bumping a counter
/// suffix when two writes land in the same second.
fn snapshot_existing(path: &Path) -> Result<PathBuf, PlanweaveError> {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");

    let mut target = path.with_file_name(format!("{}.{}.bak", base, stamp));
    let mut bump = 1u32;
    while target.exists() {
        bump += 1;
        target = path.with_file_name(format!("{}.{}-{}.bak", base, stamp, bump));
    }

    std::fs::copy(path, &target)?;
    tracing::debug!(snapshot = %target.display(), "Plan backed up");
    Ok(target)
}

/// Drop the oldest snapshots once more than `keep` exist.
///
/// Snapshot names embed the timestamp, so ascending name order is
/// oldest-first and the prune never touches file metadata.
fn prune_snapshots(path: &Path, keep: usize) -> Result<(), PlanweaveError> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    let Some(base) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };
    let marker = format!("{}.", base);

    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|candidate| {
            candidate
                .file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|name| name.starts_with(&marker) && name.ends_with(".bak"))
        })
        .collect();

    if snapshots.len() <= keep {
        return Ok(());
    }

    snapshots.sort();
    let excess = snapshots.len() - keep;
    for doomed in snapshots.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&doomed) {
            tracing::warn!(snapshot = %doomed.display(), error = %e, "Failed to prune old backup");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");

        let result = write_plan(&path, "# Plan\n").unwrap();
        assert!(result.is_new);
        assert!(result.backup_path.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Plan\n");
    }

    #[test]
    fn test_overwrite_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");

        write_plan(&path, "first").unwrap();
        let result = write_plan(&path, "second").unwrap();

        assert!(!result.is_new);
        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_same_second_backups_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");

        write_plan(&path, "v1").unwrap();
        let first = write_plan(&path, "v2").unwrap().backup_path.unwrap();
        let second = write_plan(&path, "v3").unwrap().backup_path.unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "v2");
    }

    #[test]
    fn test_prune_keeps_newest_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");

        // Seed snapshots with name-ordered timestamps, oldest first
        std::fs::write(&path, "current").unwrap();
        for hour in 0..7 {
            let name = format!("plan.md.20260801T{:02}0000.bak", hour);
            std::fs::write(dir.path().join(name), format!("h{}", hour)).unwrap();
        }

        prune_snapshots(&path, BACKUP_KEEP).unwrap();

        let remaining: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".bak"))
            .collect();

        assert_eq!(remaining.len(), BACKUP_KEEP);
        // The two oldest hours were dropped
        assert!(!remaining.iter().any(|n| n.contains("T000000")));
        assert!(!remaining.iter().any(|n| n.contains("T010000")));
        assert!(remaining.iter().any(|n| n.contains("T060000")));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/plan.md");

        let result = write_plan(&path, "content").unwrap();
        assert!(result.path.exists());
    }
}
