use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info};

const SECONDS_PER_DAY: u64 = 86_400;

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Files in `folder` whose basename matches `pattern`. A missing folder has no
/// files.
pub fn matching_files(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(pattern)
        .with_context(|| format!("invalid file pattern: {pattern}"))?;
    if !folder.is_dir() {
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(folder).with_context(|| format!("failed to read {}", folder.display()))?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.matches_with(name, MATCH_OPTIONS));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Deletes files matching `pattern` last modified more than `retain_days`
/// days ago. Individual deletion failures are skipped; the count of removed
/// files is returned.
pub fn purge(folder: &Path, pattern: &str, retain_days: i64) -> Result<usize> {
    purge_before(folder, pattern, retain_days, SystemTime::now())
}

pub fn purge_before(folder: &Path, pattern: &str, retain_days: i64, now: SystemTime) -> Result<usize> {
    if retain_days <= 0 || !folder.is_dir() {
        return Ok(0);
    }

    let window = Duration::from_secs(retain_days.unsigned_abs().saturating_mul(SECONDS_PER_DAY));
    let Some(cutoff) = now.checked_sub(window) else {
        return Ok(0);
    };

    let mut removed = 0;
    for path in matching_files(folder, pattern)? {
        let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping file without mtime");
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => debug!(path = %path.display(), error = %err, "retention delete failed"),
        }
    }

    if removed > 0 {
        info!(folder = %folder.display(), pattern, removed, retain_days, "purged old files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn touch(dir: &Path, name: &str, age_days: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * SECONDS_PER_DAY);
        file.set_modified(mtime).unwrap();
        path
    }

    #[test]
    fn removes_only_files_older_than_window() {
        let dir = tempfile::tempdir().unwrap();
        let old_a = touch(dir.path(), "UnmatchedDepartment_a.csv", 40);
        let old_b = touch(dir.path(), "UnmatchedDepartment_b.csv", 31);
        let fresh = touch(dir.path(), "UnmatchedDepartment_c.csv", 2);

        let removed = purge(dir.path(), "UnmatchedDepartment_*.csv", 30).unwrap();

        assert_eq!(removed, 2);
        assert!(!old_a.exists());
        assert!(!old_b.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn non_matching_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let other = touch(dir.path(), "notes.md", 90);
        let log = touch(dir.path(), "run.txt", 90);

        assert_eq!(purge(dir.path(), "*.txt", 7).unwrap(), 1);
        assert!(other.exists());
        assert!(!log.exists());
    }

    #[test]
    fn zero_or_negative_retention_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "run.txt", 400);

        assert_eq!(purge(dir.path(), "*.txt", 0).unwrap(), 0);
        assert_eq!(purge(dir.path(), "*.txt", -5).unwrap(), 0);
        assert!(old.exists());
    }

    #[test]
    fn missing_folder_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(purge(&dir.path().join("absent"), "*", 30).unwrap(), 0);
    }

    #[test]
    fn subdirectories_are_never_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested.txt")).unwrap();
        touch(dir.path(), "old.txt", 60);

        assert_eq!(purge(dir.path(), "*.txt", 1).unwrap(), 1);
        assert!(dir.path().join("nested.txt").is_dir());
    }
}
