//! File operation utilities
//!
//! Centralized file handling shared by the source resolver, the installers
//! and the cache, so every mutation reports the same error context.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{FileOperation, InstallError, Result};

/// Create the parent directory of `path` if needed
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(InstallError::file_system(parent, FileOperation::CreateDir))?;
    }
    Ok(())
}

/// Copy a single file, creating the destination's parent
pub async fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    ensure_parent_dir(dst).await?;
    let size = fs::copy(src, dst)
        .await
        .map_err(InstallError::file_system(dst, FileOperation::Copy))?;
    debug!("Copied {} to {} ({} bytes)", src.display(), dst.display(), size);
    Ok(size)
}

/// Remove a file or directory tree; a missing path is not an error
pub async fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(InstallError::file_system(path, FileOperation::Metadata)(e)),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::file_system(path, FileOperation::Delete)(e)),
    }
}

/// Remove a path, logging instead of failing
pub async fn remove_path_best_effort(path: &Path) {
    if let Err(e) = remove_path(path).await {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}

pub async fn path_exists(path: &Path) -> Result<bool> {
    fs::try_exists(path)
        .await
        .map_err(InstallError::file_system(path, FileOperation::Metadata))
}

/// Failure of [`move_path`]
#[derive(Debug)]
pub enum MoveError {
    /// The source is untouched
    NotMoved(InstallError),
    /// The destination holds a complete copy but the source was only partly
    /// removed
    SourceNotRemoved(InstallError),
}

impl From<MoveError> for InstallError {
    fn from(error: MoveError) -> Self {
        match error {
            MoveError::NotMoved(e) | MoveError::SourceNotRemoved(e) => e,
        }
    }
}

/// Move a file or directory
///
/// Tries a rename first. When source and destination sit on different
/// filesystems the content is copied and the source removed afterwards, so
/// the source stays intact until the copy is complete.
pub async fn move_path(src: &Path, dst: &Path) -> std::result::Result<(), MoveError> {
    ensure_parent_dir(dst).await.map_err(MoveError::NotMoved)?;

    match fs::rename(src, dst).await {
        Ok(()) => {
            debug!("Renamed {} to {}", src.display(), dst.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::CrossesDevices => copy_then_remove(src, dst).await,
        Err(e) => Err(MoveError::NotMoved(InstallError::file_system(
            src,
            FileOperation::Move,
        )(e))),
    }
}

async fn copy_then_remove(src: &Path, dst: &Path) -> std::result::Result<(), MoveError> {
    debug!(
        "Rename across filesystems, copying {} to {}",
        src.display(),
        dst.display()
    );
    let metadata = fs::metadata(src)
        .await
        .map_err(|e| MoveError::NotMoved(InstallError::file_system(src, FileOperation::Metadata)(e)))?;

    let uncancellable = CancellationToken::new();
    let copied = if metadata.is_dir() {
        TreeCopier::new(&uncancellable)
            .copy(src, dst)
            .await
            .map(|_| ())
    } else {
        copy_file(src, dst).await.map(|_| ())
    };
    if let Err(copy_error) = copied {
        remove_path_best_effort(dst).await;
        return Err(MoveError::NotMoved(copy_error));
    }

    remove_path(src).await.map_err(MoveError::SourceNotRemoved)
}

/// Counters from a tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCopyStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Copies a directory tree with an explicit work stack
///
/// Deep trees never grow the call stack, and the cancellation token is
/// checked before every entry.
pub struct TreeCopier<'a> {
    cancel: &'a CancellationToken,
    #[cfg(test)]
    fail_after_files: Option<usize>,
    #[cfg(test)]
    cancel_after_files: Option<usize>,
}

impl<'a> TreeCopier<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            #[cfg(test)]
            fail_after_files: None,
            #[cfg(test)]
            cancel_after_files: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn failing_after(mut self, files: Option<usize>) -> Self {
        self.fail_after_files = files;
        self
    }

    #[cfg(test)]
    pub(crate) fn cancelling_after(mut self, files: Option<usize>) -> Self {
        self.cancel_after_files = files;
        self
    }

    /// Copy the contents of `src` into `dst`, creating `dst` if needed
    pub async fn copy(&self, src: &Path, dst: &Path) -> Result<TreeCopyStats> {
        let mut stats = TreeCopyStats::default();
        fs::create_dir_all(dst)
            .await
            .map_err(InstallError::file_system(dst, FileOperation::CreateDir))?;

        let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

        while let Some((from_dir, to_dir)) = pending.pop() {
            let mut entries = fs::read_dir(&from_dir)
                .await
                .map_err(InstallError::file_system(&from_dir, FileOperation::ReadDir))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(InstallError::file_system(&from_dir, FileOperation::ReadDir))?
            {
                #[cfg(test)]
                if self.cancel_after_files.is_some_and(|limit| stats.files >= limit) {
                    self.cancel.cancel();
                }

                if self.cancel.is_cancelled() {
                    return Err(InstallError::cancelled(format!(
                        "copy into {} interrupted",
                        dst.display()
                    )));
                }

                let from = entry.path();
                let to = to_dir.join(entry.file_name());
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(InstallError::file_system(&from, FileOperation::Metadata))?;

                if file_type.is_dir() {
                    fs::create_dir_all(&to)
                        .await
                        .map_err(InstallError::file_system(&to, FileOperation::CreateDir))?;
                    stats.directories += 1;
                    pending.push((from, to));
                } else {
                    #[cfg(test)]
                    self.check_fault(&to, stats.files)?;

                    let size = fs::copy(&from, &to)
                        .await
                        .map_err(InstallError::file_system(&to, FileOperation::Copy))?;
                    stats.files += 1;
                    stats.bytes += size;
                }
            }
        }

        debug!(
            "Copied tree {} -> {} ({} files, {} dirs, {} bytes)",
            src.display(),
            dst.display(),
            stats.files,
            stats.directories,
            stats.bytes
        );
        Ok(stats)
    }

    #[cfg(test)]
    fn check_fault(&self, to: &Path, copied: usize) -> Result<()> {
        match self.fail_after_files {
            Some(limit) if copied >= limit => Err(InstallError::file_system(to, FileOperation::Copy)(
                std::io::Error::new(ErrorKind::StorageFull, "simulated disk full"),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn tree_copy_handles_deep_nesting() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let mut deep = src.clone();
        for level in 0..200 {
            deep = deep.join(format!("d{}", level));
        }
        write(&deep.join("leaf.txt"), "leaf").await;
        write(&src.join("top.txt"), "top").await;

        let dst = temp.path().join("dst");
        let token = CancellationToken::new();
        let stats = TreeCopier::new(&token).copy(&src, &dst).await.unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 200);
        let copied_leaf = dst.join(deep.strip_prefix(&src).unwrap()).join("leaf.txt");
        assert_eq!(fs::read_to_string(copied_leaf).await.unwrap(), "leaf");
    }

    #[tokio::test]
    async fn tree_copy_stops_when_cancelled() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        write(&src.join("a.txt"), "a").await;

        let token = CancellationToken::new();
        token.cancel();
        let result = TreeCopier::new(&token).copy(&src, &temp.path().join("dst")).await;

        assert!(matches!(result, Err(InstallError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn tree_copy_stops_between_entries() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            write(&src.join(name), name).await;
        }

        let token = CancellationToken::new();
        let dst = temp.path().join("dst");
        let result = TreeCopier::new(&token)
            .cancelling_after(Some(2))
            .copy(&src, &dst)
            .await;

        assert!(matches!(result, Err(InstallError::Cancelled { .. })));
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn remove_path_ignores_missing() {
        let temp = tempdir().unwrap();
        remove_path(&temp.path().join("missing")).await.unwrap();

        let dir = temp.path().join("dir");
        write(&dir.join("nested/file.txt"), "x").await;
        remove_path(&dir).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn move_path_renames_directories() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("old");
        write(&src.join("file.txt"), "content").await;

        let dst = temp.path().join("backup/old");
        move_path(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("file.txt")).await.unwrap(), "content");
    }
}
