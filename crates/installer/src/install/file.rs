//! File-mode installs: the archive itself is the installation

use std::path::Path;
use tracing::{debug, info, warn};

use super::backup::Backup;
use super::{InstallContext, InstallPlan, InstallReport, restore_failed};
use crate::config::InstallerConfig;
use crate::core::files::{copy_file, ensure_parent_dir, remove_path};
use crate::core::{InstallError, InstallStage, Result};

/// Progress of a file-mode install, used to pick the rollback action
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileInstallState {
    NoPriorFile,
    BackupCreated { backup: Backup },
    Replaced { backup: Option<Backup> },
    Committed,
}

impl FileInstallState {
    fn backup(&self) -> Option<&Backup> {
        match self {
            FileInstallState::BackupCreated { backup } => Some(backup),
            FileInstallState::Replaced { backup } => backup.as_ref(),
            _ => None,
        }
    }
}

/// Copies the package archive onto the target path
#[derive(Debug, Clone, Default)]
pub struct FileInstaller {
    #[cfg(test)]
    fail_copy: bool,
}

impl FileInstaller {
    #[cfg_attr(not(test), allow(unused_variables))]
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            #[cfg(test)]
            fail_copy: config.faults.fail_file_copy,
        }
    }

    pub async fn install(&self, ctx: &InstallContext<'_>) -> Result<InstallReport> {
        let mut state = FileInstallState::NoPriorFile;
        let mut report = InstallReport::default();

        match self.apply(ctx, &mut state, &mut report).await {
            Ok(()) => {
                if let Some(backup) = state.backup() {
                    backup.discard().await;
                }
                state = FileInstallState::Committed;
                debug!("File install of {} reached {:?}", ctx.descriptor.package.id, state);
                Ok(report)
            }
            Err(e) => Err(self.roll_back(ctx, &state, e).await),
        }
    }

    async fn apply(
        &self,
        ctx: &InstallContext<'_>,
        state: &mut FileInstallState,
        report: &mut InstallReport,
    ) -> Result<()> {
        let target = &ctx.descriptor.target;

        // 1. make room for the target
        ensure_parent_dir(target).await?;

        // 2. back up the previous file before anything changes
        if let InstallPlan::Update { existing, .. } = ctx.plan {
            ctx.check_cancelled("backing up the previous file")?;
            let backup = Backup::reserve(existing)?;
            if let Err(e) = copy_file(existing, backup.path()).await {
                backup.discard().await;
                return Err(e);
            }
            debug!("Backed up {} to {}", existing.display(), backup.path().display());
            *state = FileInstallState::BackupCreated { backup };

            if let (Some(key), Some(backup)) = (ctx.backup_cache_key(), state.backup()) {
                report.backup_cached = ctx.cache.store_file_best_effort(&key, backup.path()).await;
            }
        }

        // 3. write the new file
        ctx.check_cancelled("replacing the file")?;
        ctx.progress.emit(
            InstallStage::Replacing,
            format!("Writing {}", target.display()),
        );
        self.replace(&ctx.package.path, target).await?;
        *state = FileInstallState::Replaced {
            backup: state.backup().cloned(),
        };
        report.files_installed = 1;

        // 4. drop the old file when the release was renamed
        if let InstallPlan::Update {
            existing,
            renamed: true,
        } = ctx.plan
        {
            remove_path(existing).await?;
            info!("Removed previous release {}", existing.display());
        }

        Ok(())
    }

    async fn replace(&self, src: &Path, target: &Path) -> Result<()> {
        #[cfg(test)]
        if self.fail_copy {
            return simulate_disk_full(src, target).await;
        }

        copy_file(src, target).await.map(|_| ())
    }

    /// Put the target back the way it was and return the error to report
    async fn roll_back(
        &self,
        ctx: &InstallContext<'_>,
        state: &FileInstallState,
        original: InstallError,
    ) -> InstallError {
        let target = &ctx.descriptor.target;

        let Some(backup) = state.backup() else {
            if ctx.plan.is_update() {
                // failed while taking the backup, nothing was changed yet
                return original;
            }
            if let Err(e) = remove_path(target).await {
                warn!("Could not remove partial file {}: {}", target.display(), e);
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

        if existing != target.as_path() {
            if let Err(e) = remove_path(target).await {
                return restore_failed(target, backup.path(), original, e);
            }
        }
        match copy_file(backup.path(), existing).await {
            Ok(_) => {
                backup.discard().await;
                info!("Restored {}", existing.display());
                original
            }
            Err(e) => restore_failed(existing, backup.path(), original, e),
        }
    }
}

#[cfg(test)]
async fn simulate_disk_full(src: &Path, target: &Path) -> Result<()> {
    use crate::core::FileOperation;

    let bytes = tokio::fs::read(src)
        .await
        .map_err(InstallError::file_system(src, FileOperation::Read))?;
    tokio::fs::write(target, &bytes[..bytes.len() / 2])
        .await
        .map_err(InstallError::file_system(target, FileOperation::Write))?;
    Err(InstallError::file_system(target, FileOperation::Copy)(
        std::io::Error::new(std::io::ErrorKind::StorageFull, "simulated disk full"),
    ))
}
