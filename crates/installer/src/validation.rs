//! Package validation
//!
//! A payload is a package when it is a readable zip archive containing the
//! manifest file somewhere inside it. Validation runs before anything on the
//! target is touched.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::archive;
use crate::core::{InstallError, Result};

/// Proof that a payload passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPackage {
    pub path: PathBuf,
    /// Archive entry that matched the manifest name
    pub manifest_entry: String,
    pub entry_count: usize,
}

/// Checks payloads for the manifest entry
#[derive(Debug, Clone)]
pub struct PackageValidator {
    manifest_name: String,
}

impl PackageValidator {
    pub fn new<S: Into<String>>(manifest_name: S) -> Self {
        Self {
            manifest_name: manifest_name.into(),
        }
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    /// Inspect the archive at `path` without extracting it
    pub async fn validate(&self, path: &Path) -> Result<ValidatedPackage> {
        let archive_path = path.to_path_buf();
        let manifest_name = self.manifest_name.clone();

        let inspection = tokio::task::spawn_blocking(move || {
            archive::inspect_archive(&archive_path, &manifest_name)
        })
        .await
        .map_err(|e| InstallError::Validation {
            file: path.to_path_buf(),
            reason: format!("inspection task failed: {}", e),
        })??;

        let Some(manifest_entry) = inspection.manifest_entry else {
            return Err(InstallError::Validation {
                file: path.to_path_buf(),
                reason: format!(
                    "no '{}' found among {} archive entries",
                    self.manifest_name, inspection.entry_count
                ),
            });
        };

        debug!(
            "Validated {} (manifest entry '{}', {} entries)",
            path.display(),
            manifest_entry,
            inspection.entry_count
        );
        Ok(ValidatedPackage {
            path: path.to_path_buf(),
            manifest_entry,
            entry_count: inspection.entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InstallFailureKind;
    use crate::tests::support::zip_bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn accepts_manifest_below_wrapper_folder() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wrapped.zip");
        tokio::fs::write(&path, zip_bytes(&[("Wrapper/ModInfo.json", b"{}"), ("Wrapper/a.dll", b"x")]))
            .await
            .unwrap();

        let validated = PackageValidator::new("modinfo.json").validate(&path).await.unwrap();
        assert_eq!(validated.manifest_entry, "Wrapper/ModInfo.json");
        assert_eq!(validated.entry_count, 2);
    }

    #[tokio::test]
    async fn rejects_archive_without_manifest() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("plain.zip");
        tokio::fs::write(&path, zip_bytes(&[("readme.txt", b"hello")])).await.unwrap();

        let error = PackageValidator::new("modinfo.json").validate(&path).await.unwrap_err();
        assert_eq!(error.kind(), InstallFailureKind::Validation);
    }
}
