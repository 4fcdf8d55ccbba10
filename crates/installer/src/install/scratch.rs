//! Per-call scratch directories

use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

use crate::core::{FileOperation, InstallError, Result};

/// Uniquely named working directory owned by one install call
///
/// Holds the downloaded payload and the extraction tree. Dropping it removes
/// everything.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Create `<root>/install-<random>`
    pub async fn create(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(InstallError::file_system(root, FileOperation::CreateDir))?;

        let dir = Builder::new()
            .prefix("install-")
            .tempdir_in(root)
            .map_err(InstallError::file_system(root, FileOperation::CreateDir))?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.path().join("download")
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.path().join("extract")
    }

    /// Remove the directory and everything in it
    pub async fn close(self) {
        let path = self.dir.path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || self.dir.close()).await;
        match removed {
            Ok(Ok(())) => debug!("Removed scratch directory {}", path.display()),
            Ok(Err(e)) => warn!("Could not remove scratch directory {}: {}", path.display(), e),
            Err(e) => warn!("Scratch cleanup task for {} failed: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn each_call_gets_its_own_directory() {
        let root = tempdir().unwrap();
        let first = ScratchSpace::create(root.path()).await.unwrap();
        let second = ScratchSpace::create(root.path()).await.unwrap();

        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(root.path()));

        let first_path = first.path().to_path_buf();
        first.close().await;
        assert!(!first_path.exists());
        assert!(second.path().exists());
    }
}
