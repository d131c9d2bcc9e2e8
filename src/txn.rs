//! Staged multi-file updates.
//!
//! A [`Transaction`] collects the full new contents of every file an operation
//! touches. Nothing reaches the disk until [`Transaction::commit`], which
//! replaces each file through a temporary sibling and a rename. If any step
//! fails, the files already replaced are restored in reverse order.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
enum Staged {
    Write(String),
    Remove,
}

#[derive(Debug, Default)]
pub struct Transaction {
    staged: Vec<(PathBuf, Staged)>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the complete new contents of `path`.
    pub fn write(&mut self, path: impl Into<PathBuf>, contents: String) {
        self.stage(path.into(), Staged::Write(contents));
    }

    /// Stages the removal of `path`.
    pub fn remove(&mut self, path: impl Into<PathBuf>) {
        self.stage(path.into(), Staged::Remove);
    }

    fn stage(&mut self, path: PathBuf, change: Staged) {
        // Later stages of the same file replace earlier ones.
        if let Some(slot) = self.staged.iter_mut().find(|(p, _)| *p == path) {
            slot.1 = change;
        } else {
            self.staged.push((path, change));
        }
    }

    /// Applies every staged change, rolling back on the first failure.
    pub fn commit(self) -> Result<()> {
        let mut originals = Vec::with_capacity(self.staged.len());
        for (path, _) in &self.staged {
            let original = match fs::read(path) {
                Ok(bytes) => Some(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(source) => {
                    return Err(StoreError::Commit {
                        path: path.clone(),
                        source,
                        rolled_back: true,
                    })
                }
            };
            originals.push(original);
        }

        for (idx, (path, change)) in self.staged.iter().enumerate() {
            let applied = match change {
                Staged::Write(contents) => atomic_write_file(path, contents.as_bytes()),
                Staged::Remove => remove_if_present(path),
            };
            if let Err(source) = applied {
                tracing::warn!(path = %path.display(), error = %source, "commit failed, rolling back");
                let rolled_back = rollback(&self.staged[..idx], &originals[..idx]);
                return Err(StoreError::Commit {
                    path: path.clone(),
                    source,
                    rolled_back,
                });
            }
            tracing::debug!(path = %path.display(), "committed");
        }
        Ok(())
    }
}

fn rollback(applied: &[(PathBuf, Staged)], originals: &[Option<Vec<u8>>]) -> bool {
    let mut clean = true;
    for ((path, _), original) in applied.iter().zip(originals).rev() {
        let restored = match original {
            Some(bytes) => atomic_write_file(path, bytes),
            None => remove_if_present(path),
        };
        if let Err(err) = restored {
            tracing::error!(path = %path.display(), error = %err, "rollback failed");
            clean = false;
        }
    }
    clean
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Replaces `path` with `content` via a temporary sibling and a rename.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("store"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    sync_parent_dir(parent)
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_writes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.csv");
        let gone = dir.path().join("gone.csv");
        fs::write(&keep, "old\n").unwrap();
        fs::write(&gone, "x\n").unwrap();

        let mut txn = Transaction::new();
        txn.write(&keep, "new\n".to_string());
        txn.remove(&gone);
        txn.commit().unwrap();

        assert_eq!(fs::read_to_string(&keep).unwrap(), "new\n");
        assert!(!gone.exists());
    }

    #[test]
    fn later_stage_replaces_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut txn = Transaction::new();
        txn.write(&path, "first\n".to_string());
        txn.write(&path, "second\n".to_string());
        txn.commit().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn failed_step_restores_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.csv");
        let created = dir.path().join("created.csv");
        fs::write(&first, "original\n").unwrap();
        // Parent directory does not exist, so this write fails.
        let broken = dir.path().join("missing").join("x.csv");

        let mut txn = Transaction::new();
        txn.write(&first, "changed\n".to_string());
        txn.write(&created, "fresh\n".to_string());
        txn.write(&broken, "never\n".to_string());
        let err = txn.commit().unwrap_err();

        match err {
            StoreError::Commit { rolled_back, .. } => assert!(rolled_back),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read_to_string(&first).unwrap(), "original\n");
        assert!(!created.exists());
    }

    #[cfg(unix)]
    #[test]
    fn parent_directory_is_synced_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Shells");
        fs::create_dir_all(&nested).unwrap();
        atomic_write_file(&nested.join("shells.csv"), b"/bin/sh\n").unwrap();
        sync_parent_dir(&nested).unwrap();
        assert!(sync_parent_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        atomic_write_file(&path, b"one\n").unwrap();
        atomic_write_file(&path, b"two\n").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "two\n");
    }
}
