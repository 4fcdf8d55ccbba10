//! Directory-mode installs: the archive is extracted into a directory tree
//!
//! The previous tree is moved into a [`Backup`] next to it before anything
//! is extracted, so a failure at any later point can put it back untouched.
//! The new tree is merged into the target with [`TreeCopier`], which checks
//! for cancellation before every entry.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::backup::Backup;
use super::{InstallContext, InstallPlan, InstallReport, restore_failed};
use crate::archive;
use crate::config::InstallerConfig;
use crate::core::files::{MoveError, TreeCopier, move_path, remove_path, remove_path_best_effort};
use crate::core::{FileOperation, InstallError, InstallStage, Result};

/// Which folder of the extracted archive holds the package
///
/// Archives are often authored with a single wrapper folder around the
/// actual content. A top level with exactly one directory and no files is
/// treated as such a wrapper. A package that legitimately consists of a
/// single folder is indistinguishable from that and gets unwrapped too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadRoot {
    /// Content sits directly at the top of the archive
    ExtractionRoot,
    /// Content sits inside the single top-level folder `wrapper`
    Unwrapped { wrapper: String },
}

impl std::fmt::Display for PayloadRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadRoot::ExtractionRoot => write!(f, "archive root"),
            PayloadRoot::Unwrapped { wrapper } => write!(f, "wrapper folder '{}'", wrapper),
        }
    }
}

/// Progress of a directory-mode install, used to pick the rollback action
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirectoryInstallState {
    NoPriorDirectory,
    BackupMoved { backup: Backup },
    Extracted { backup: Option<Backup> },
    PayloadResolved { backup: Option<Backup> },
    Merged { backup: Option<Backup> },
    Committed,
}

impl DirectoryInstallState {
    fn backup(&self) -> Option<&Backup> {
        match self {
            DirectoryInstallState::BackupMoved { backup } => Some(backup),
            DirectoryInstallState::Extracted { backup }
            | DirectoryInstallState::PayloadResolved { backup }
            | DirectoryInstallState::Merged { backup } => backup.as_ref(),
            DirectoryInstallState::NoPriorDirectory | DirectoryInstallState::Committed => None,
        }
    }

    fn owned_backup(&self) -> Option<Backup> {
        self.backup().cloned()
    }
}

/// Extracts the package and merges it into the target directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryInstaller {
    #[cfg(test)]
    fail_merge_after_files: Option<usize>,
    #[cfg(test)]
    cancel_merge_after_files: Option<usize>,
    #[cfg(test)]
    fail_backup_source_removal: bool,
}

impl DirectoryInstaller {
    #[cfg_attr(not(test), allow(unused_variables))]
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            #[cfg(test)]
            fail_merge_after_files: config.faults.fail_merge_after_files,
            #[cfg(test)]
            cancel_merge_after_files: config.faults.cancel_merge_after_files,
            #[cfg(test)]
            fail_backup_source_removal: config.faults.fail_backup_source_removal,
        }
    }

    pub async fn install(&self, ctx: &InstallContext<'_>) -> Result<InstallReport> {
        let mut state = DirectoryInstallState::NoPriorDirectory;
        let mut report = InstallReport::default();

        match self.apply(ctx, &mut state, &mut report).await {
            Ok(()) => {
                self.commit(ctx, &state).await;
                state = DirectoryInstallState::Committed;
                debug!("Directory install of {} reached {:?}", ctx.descriptor.package.id, state);
                Ok(report)
            }
            Err(e) => Err(self.roll_back(ctx, &state, e).await),
        }
    }

    async fn apply(
        &self,
        ctx: &InstallContext<'_>,
        state: &mut DirectoryInstallState,
        report: &mut InstallReport,
    ) -> Result<()> {
        let target = &ctx.descriptor.target;
        let extract_dir = ctx.scratch.extract_dir();

        // 1. fresh extraction directory
        remove_path(&extract_dir).await?;
        tokio::fs::create_dir_all(&extract_dir)
            .await
            .map_err(InstallError::file_system(&extract_dir, FileOperation::CreateDir))?;

        // 2. move the previous tree out of the way
        if let InstallPlan::Update { existing, .. } = ctx.plan {
            ctx.check_cancelled("backing up the previous directory")?;
            let backup = Backup::reserve(existing)?;
            let moved = self.take_backup(existing, backup.path()).await;
            match moved {
                Ok(()) => {
                    info!("Moved {} to backup {}", existing.display(), backup.path().display());
                }
                Err(MoveError::NotMoved(e)) => {
                    backup.discard().await;
                    return Err(e);
                }
                Err(MoveError::SourceNotRemoved(e)) => {
                    warn!(
                        "{} was copied to {} but not fully removed",
                        existing.display(),
                        backup.path().display()
                    );
                    *state = DirectoryInstallState::BackupMoved { backup };
                    return Err(e);
                }
            }
            *state = DirectoryInstallState::BackupMoved { backup };
        }

        // 3. extract
        ctx.check_cancelled("extracting")?;
        let stats = extract(ctx, &extract_dir).await?;
        debug!(
            "Extracted {} files, {} directories ({} unsafe entries skipped)",
            stats.files, stats.directories, stats.skipped
        );
        *state = DirectoryInstallState::Extracted {
            backup: state.owned_backup(),
        };

        // 4. find the folder that holds the package
        let (payload, root) = resolve_payload_root(&extract_dir).await?;
        info!("Installing {} from {}", ctx.descriptor.package.id, root);
        *state = DirectoryInstallState::PayloadResolved {
            backup: state.owned_backup(),
        };
        report.payload_root = Some(root);

        // 5. merge into the target
        ctx.check_cancelled("merging")?;
        ctx.progress.emit(
            InstallStage::Replacing,
            format!("Copying files into {}", target.display()),
        );
        let copier = TreeCopier::new(ctx.cancel);
        #[cfg(test)]
        let copier = copier
            .failing_after(self.fail_merge_after_files)
            .cancelling_after(self.cancel_merge_after_files);
        let copied = copier.copy(&payload, target).await?;
        report.files_installed = copied.files;
        *state = DirectoryInstallState::Merged {
            backup: state.owned_backup(),
        };

        // 6. keep the outgoing release in the cache
        if let (Some(backup), Some(key)) = (state.backup(), ctx.backup_cache_key()) {
            report.backup_cached = ctx
                .cache
                .store_directory_best_effort(&key, backup.path(), ctx.cancel)
                .await;
        }

        Ok(())
    }

    async fn commit(&self, ctx: &InstallContext<'_>, state: &DirectoryInstallState) {
        if let Some(backup) = state.backup() {
            backup.discard().await;
        }
        remove_path_best_effort(&ctx.scratch.extract_dir()).await;
    }

    /// Put the previous tree back and return the error to report
    async fn roll_back(
        &self,
        ctx: &InstallContext<'_>,
        state: &DirectoryInstallState,
        original: InstallError,
    ) -> InstallError {
        let target = &ctx.descriptor.target;

        let Some(backup) = state.backup() else {
            if ctx.plan.is_update() {
                // the previous tree was never moved
                return original;
            }
            if let Err(e) = remove_path(target).await {
                warn!("Could not remove partial directory {}: {}", target.display(), e);
            }
            return original;
        };

        let existing = ctx.plan.existing().unwrap_or(target.as_path());
        warn!(
            "Rolling back {} from {} after: {}",
            existing.display(),
            backup.path().display(),
            original
        );

        // whatever is left at the existing path is covered by the backup
        for path in [target.as_path(), existing] {
            if let Err(e) = remove_path(path).await {
                return restore_failed(existing, backup.path(), original, e);
            }
        }
        match move_path(backup.path(), existing).await {
            Ok(()) => {}
            Err(MoveError::SourceNotRemoved(e)) => {
                warn!("Restored {} but the backup copy remains: {}", existing.display(), e);
            }
            Err(MoveError::NotMoved(e)) => {
                return restore_failed(existing, backup.path(), original, e);
            }
        }
        backup.discard().await;
        info!("Restored {}", existing.display());
        original
    }

    async fn take_backup(
        &self,
        existing: &Path,
        backup: &Path,
    ) -> std::result::Result<(), MoveError> {
        #[cfg(test)]
        if self.fail_backup_source_removal {
            return simulate_partial_source_removal(existing, backup).await;
        }

        move_path(existing, backup).await
    }
}

/// Copy `src` like a cross-filesystem move, then stop after deleting one file
#[cfg(test)]
async fn simulate_partial_source_removal(
    src: &Path,
    dst: &Path,
) -> std::result::Result<(), MoveError> {
    let uncancellable = tokio_util::sync::CancellationToken::new();
    TreeCopier::new(&uncancellable)
        .copy(src, dst)
        .await
        .map_err(MoveError::NotMoved)?;

    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| MoveError::NotMoved(InstallError::file_system(src, FileOperation::ReadDir)(e)))?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().is_file() {
            let _ = tokio::fs::remove_file(entry.path()).await;
            break;
        }
    }
    Err(MoveError::SourceNotRemoved(InstallError::file_system(
        src,
        FileOperation::Delete,
    )(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "simulated locked file",
    ))))
}

async fn extract(ctx: &InstallContext<'_>, extract_dir: &Path) -> Result<archive::ExtractStats> {
    let archive_path = ctx.package.path.clone();
    let dest = extract_dir.to_path_buf();
    let cancel = ctx.cancel.clone();

    tokio::task::spawn_blocking(move || archive::extract_archive(&archive_path, &dest, &cancel))
        .await
        .map_err(|e| {
            InstallError::file_system(extract_dir, FileOperation::Extract)(std::io::Error::other(e))
        })?
}

/// Pick the payload root of an extracted archive
pub async fn resolve_payload_root(extract_dir: &Path) -> Result<(PathBuf, PayloadRoot)> {
    let mut entries = tokio::fs::read_dir(extract_dir)
        .await
        .map_err(InstallError::file_system(extract_dir, FileOperation::ReadDir))?;

    let mut directories = Vec::new();
    let mut files = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(InstallError::file_system(extract_dir, FileOperation::ReadDir))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(InstallError::file_system(entry.path(), FileOperation::Metadata))?;
        if file_type.is_dir() {
            directories.push(entry);
        } else {
            files += 1;
        }
    }

    if files == 0 && directories.len() == 1 {
        let wrapper = &directories[0];
        return Ok((
            wrapper.path(),
            PayloadRoot::Unwrapped {
                wrapper: wrapper.file_name().to_string_lossy().into_owned(),
            },
        ));
    }
    Ok((extract_dir.to_path_buf(), PayloadRoot::ExtractionRoot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn single_folder_is_unwrapped() {
        let temp = tempdir().unwrap();
        tokio::fs::create_dir_all(temp.path().join("MyMod/assets")).await.unwrap();
        tokio::fs::write(temp.path().join("MyMod/modinfo.json"), "{}").await.unwrap();

        let (payload, root) = resolve_payload_root(temp.path()).await.unwrap();
        assert_eq!(payload, temp.path().join("MyMod"));
        assert_eq!(
            root,
            PayloadRoot::Unwrapped {
                wrapper: "MyMod".to_string()
            }
        );
    }

    #[tokio::test]
    async fn loose_file_keeps_extraction_root() {
        let temp = tempdir().unwrap();
        tokio::fs::create_dir_all(temp.path().join("assets")).await.unwrap();
        tokio::fs::write(temp.path().join("modinfo.json"), "{}").await.unwrap();

        let (payload, root) = resolve_payload_root(temp.path()).await.unwrap();
        assert_eq!(payload, temp.path());
        assert_eq!(root, PayloadRoot::ExtractionRoot);
    }

    #[tokio::test]
    async fn two_folders_keep_extraction_root() {
        let temp = tempdir().unwrap();
        tokio::fs::create_dir_all(temp.path().join("a")).await.unwrap();
        tokio::fs::create_dir_all(temp.path().join("b")).await.unwrap();

        let (_, root) = resolve_payload_root(temp.path()).await.unwrap();
        assert_eq!(root, PayloadRoot::ExtractionRoot);
    }
}
