//! Core types used throughout the installer
//!
//! This module contains the fundamental types that all other modules depend on:
//! the install descriptor handed in by callers, the result handed back, errors
//! and progress reporting.

pub mod error;
pub mod files;
pub mod progress;

pub use error::{ErrorSeverity, FileOperation, InstallError, InstallFailureKind, Result};
pub use progress::{
    CompositeProgressReporter, InstallStage, IntoProgressCallback, LogProgressReporter,
    NullProgressReporter, ProgressCallback, ProgressEvent, ProgressReporter, ProgressSink,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable identity of a package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIdentity {
    /// Stable identifier, used for cache keys
    pub id: String,
    /// Human readable name, used in messages
    pub display_name: String,
}

impl PackageIdentity {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, display_name: N) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Shape of the installed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// The archive itself is the installation
    File,
    /// The archive is extracted into a directory tree
    Directory,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::File => write!(f, "file"),
            TargetKind::Directory => write!(f, "directory"),
        }
    }
}

/// Everything an install call needs to know
///
/// The descriptor is immutable for the lifetime of one call. In particular
/// `target_kind` is taken as given and never re-derived from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallDescriptor {
    #[serde(flatten)]
    pub package: PackageIdentity,
    /// Network address or local file path
    pub source: String,
    /// Absolute path that receives the package
    pub target: PathBuf,
    pub target_kind: TargetKind,
    /// Declared file name of the incoming release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Version of the incoming release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Version of the release currently installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Location of the previous installation when it differs from `target`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_path: Option<PathBuf>,
}

impl InstallDescriptor {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(
        package: PackageIdentity,
        source: S,
        target: P,
        target_kind: TargetKind,
    ) -> Self {
        Self {
            package,
            source: source.into(),
            target: target.into(),
            target_kind,
            file_name: None,
            version: None,
            previous_version: None,
            existing_path: None,
        }
    }

    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_previous_version<S: Into<String>>(mut self, version: S) -> Self {
        self.previous_version = Some(version.into());
        self
    }

    pub fn with_existing_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.existing_path = Some(path.into());
        self
    }

    /// Where the previous installation lives, if any
    pub fn previous_install_path(&self) -> &Path {
        self.existing_path.as_deref().unwrap_or(&self.target)
    }

    /// True when the previous installation sits at a different path
    pub fn is_renamed(&self) -> bool {
        self.existing_path
            .as_deref()
            .is_some_and(|existing| existing != self.target.as_path())
    }

    /// Reject descriptors the installers cannot act on safely
    pub fn check(&self) -> Result<()> {
        if self.package.id.trim().is_empty() {
            return Err(self.invalid("package id is empty"));
        }
        if self.source.trim().is_empty() {
            return Err(self.invalid("source is empty"));
        }
        if !self.target.is_absolute() {
            return Err(self.invalid(format!(
                "target '{}' is not an absolute path",
                self.target.display()
            )));
        }
        if self.target.parent().is_none() {
            return Err(self.invalid("target must not be a filesystem root"));
        }
        if let Some(existing) = &self.existing_path {
            if !existing.is_absolute() {
                return Err(self.invalid(format!(
                    "existing path '{}' is not an absolute path",
                    existing.display()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn invalid<S: Into<String>>(&self, reason: S) -> InstallError {
        InstallError::InvalidDescriptor {
            package: self.package.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Outcome of [`crate::Installer::install`]
///
/// There is no partial success: either the target holds the new package or
/// it holds exactly what it held before the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub success: bool,
    /// Human readable failure description
    pub error: Option<String>,
    pub failure_kind: Option<InstallFailureKind>,
    /// Whether the payload came from the cache
    pub from_cache: bool,
}

impl InstallResult {
    pub fn succeeded(from_cache: bool) -> Self {
        Self {
            success: true,
            error: None,
            failure_kind: None,
            from_cache,
        }
    }

    pub fn failed(error: &InstallError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            failure_kind: Some(error.kind()),
            from_cache: false,
        }
    }

    /// Cancelled installs are failures that need no user-facing alarm
    pub fn is_cancelled(&self) -> bool {
        self.failure_kind == Some(InstallFailureKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let json = r#"{
            "id": "example.mod",
            "displayName": "Example Mod",
            "source": "https://example.com/example-1.2.zip",
            "target": "/games/mods/example",
            "targetKind": "directory",
            "version": "1.2.0",
            "previousVersion": "1.1.0"
        }"#;

        let descriptor: InstallDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.package.id, "example.mod");
        assert_eq!(descriptor.target_kind, TargetKind::Directory);
        assert_eq!(descriptor.previous_version.as_deref(), Some("1.1.0"));
        assert!(descriptor.existing_path.is_none());
        assert!(descriptor.check().is_ok());
    }

    #[test]
    fn relative_target_is_rejected() {
        let descriptor = InstallDescriptor::new(
            PackageIdentity::new("a", "A"),
            "https://example.com/a.zip",
            "mods/a.zip",
            TargetKind::File,
        );

        let error = descriptor.check().unwrap_err();
        assert_eq!(error.kind(), InstallFailureKind::InvalidInput);
    }

    #[test]
    fn renamed_only_when_paths_differ() {
        let target = std::env::temp_dir().join("mods").join("a-2.zip");
        let same = InstallDescriptor::new(
            PackageIdentity::new("a", "A"),
            "a.zip",
            &target,
            TargetKind::File,
        )
        .with_existing_path(&target);
        assert!(!same.is_renamed());

        let renamed = same.clone().with_existing_path(target.with_file_name("a-1.zip"));
        assert!(renamed.is_renamed());
        assert_eq!(renamed.previous_install_path(), target.with_file_name("a-1.zip"));
    }
}
