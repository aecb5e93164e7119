//! File system utils.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use fs2::FileExt;

use crate::error::{Error, Result};

pub struct FsHandler;

/// An exclusive advisory lock held for as long as the guard lives.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(err = ?e, path = %self.path.display(), "Failed to release lock");
        }
    }
}

impl FsHandler {
    /// Create the parent directory of `path` if it doesn't exist.
    pub fn create_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Record(format!("failed to create directory {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }

    /// Block until an exclusive lock on `<path>.lock` is acquired.
    pub fn lock(path: &Path) -> Result<LockGuard> {
        let lock_path = Self::sibling(path, "lock");
        Self::create_parent_dir(&lock_path)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::Record(format!("failed to open lock file {}: {}", lock_path.display(), e))
            })?;

        file.lock_exclusive().map_err(|e| {
            Error::Record(format!("failed to lock {}: {}", lock_path.display(), e))
        })?;

        tracing::trace!(path = %lock_path.display(), "Lock acquired");

        Ok(LockGuard {
            file,
            path: lock_path,
        })
    }

    /// Replace `path` with `content`. Readers see either the old or the new
    /// file, never a partial write.
    pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        Self::create_parent_dir(path)?;
        let tmp_path = Self::sibling(path, "tmp");

        let mut tmp = File::create(&tmp_path).map_err(|e| {
            Error::Record(format!("failed to create {}: {}", tmp_path.display(), e))
        })?;
        tmp.write_all(content)?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, path).map_err(|e| {
            Error::Record(format!(
                "failed to move {} to {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Write `content` unless the file already holds exactly that. Returns
    /// whether the file was written.
    pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
        if std::fs::read_to_string(path).is_ok_and(|current| current == content) {
            tracing::debug!(path = %path.display(), "File unchanged");
            return Ok(false);
        }
        Self::write_atomic(path, content.as_bytes())?;
        Ok(true)
    }

    fn sibling(path: &Path, extension: &str) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(extension);
        path.with_file_name(name)
    }
}
