//! Backups of the previous installation
//!
//! A backup is kept in a hidden sibling of the installation it protects,
//! `<parent>/.<name>.bak-<random>/<name>`. Sitting on the same filesystem,
//! a directory backup is a plain rename. It is not part of the scratch
//! directory, so it outlives an install call that is dropped midway, and is
//! only removed once the new release is in place or the old one is back.

use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::core::files::remove_path_best_effort;
use crate::core::{FileOperation, InstallError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    dir: PathBuf,
    entry: PathBuf,
}

impl Backup {
    /// Reserve a backup location next to `existing`
    pub fn reserve(existing: &Path) -> Result<Self> {
        let parent = existing
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = existing
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "previous".to_string());

        let dir = Builder::new()
            .prefix(&format!(".{}.bak-", name))
            .tempdir_in(parent)
            .map_err(InstallError::file_system(parent, FileOperation::CreateDir))?
            .keep();
        debug!("Reserved backup directory {}", dir.display());

        Ok(Self {
            entry: dir.join(&name),
            dir,
        })
    }

    /// Where the previous installation is kept
    pub fn path(&self) -> &Path {
        &self.entry
    }

    /// Remove the backup together with its directory
    pub async fn discard(&self) {
        remove_path_best_effort(&self.dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn backup_sits_next_to_the_installation() {
        let temp = tempdir().unwrap();
        let existing = temp.path().join("CoolMod");

        let first = Backup::reserve(&existing).unwrap();
        let second = Backup::reserve(&existing).unwrap();

        assert_ne!(first, second);
        let holder = first.path().parent().unwrap();
        assert_eq!(holder.parent().unwrap(), temp.path());
        assert!(holder.file_name().unwrap().to_string_lossy().starts_with(".CoolMod.bak-"));
        assert_eq!(first.path().file_name().unwrap(), "CoolMod");

        tokio::fs::write(first.path(), b"old").await.unwrap();
        first.discard().await;
        assert!(!holder.exists());
        assert!(second.path().parent().unwrap().exists());
    }
}
