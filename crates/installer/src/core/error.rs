//! Error types for the installer core with context and recovery information

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// Every way an install call can fail
///
/// Errors never cross the [`crate::Installer::install`] boundary; they are
/// converted into an [`crate::InstallResult`] there. Callers that want typed
/// errors use [`crate::Installer::try_install`].
#[derive(Error, Debug)]
pub enum InstallError {
    /// HTTP-related errors with context
    #[error("Transfer from '{url}' failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Network timeout with retry suggestion
    #[error("Request to '{url}' timed out after {duration_secs}s")]
    NetworkTimeout {
        url: String,
        duration_secs: u64,
    },

    /// Network access is switched off and the cache had nothing to offer
    #[error("Network access is disabled and no cached copy of '{package}' exists")]
    NetworkDisabled {
        package: String,
    },

    /// The source URI could not be interpreted
    #[error("Invalid package source '{uri}': {suggestion}")]
    InvalidSource {
        uri: String,
        suggestion: String,
    },

    /// The descriptor or the filesystem state contradicts itself
    #[error("Invalid install request for '{package}': {reason}")]
    InvalidDescriptor {
        package: String,
        reason: String,
    },

    /// Local source file is missing
    #[error("Local package source '{path}' does not exist")]
    SourceNotFound {
        path: PathBuf,
    },

    /// The payload is not a package
    #[error("'{file}' is not a valid package: {reason}")]
    Validation {
        file: PathBuf,
        reason: String,
    },

    /// Archive could be opened but an entry could not be read
    #[error("Archive '{path}' could not be read")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// File system I/O errors with file context
    #[error("File operation failed while {operation} '{path}'")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative abort
    #[error("Install cancelled: {reason}")]
    Cancelled {
        reason: String,
    },

    /// Rollback failed; the previous installation only survives in the backup
    #[error("Failed to restore previous installation at '{path}' (backup kept at '{backup}') after: {original}")]
    RestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        original: Box<InstallError>,
        #[source]
        source: std::io::Error,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Copy,
    Delete,
    Move,
    Metadata,
    CreateDir,
    ReadDir,
    Extract,
    Compress,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Copy => write!(f, "copying"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Metadata => write!(f, "reading metadata of"),
            FileOperation::CreateDir => write!(f, "creating directory"),
            FileOperation::ReadDir => write!(f, "listing directory"),
            FileOperation::Extract => write!(f, "extracting"),
            FileOperation::Compress => write!(f, "compressing"),
        }
    }
}

/// Coarse failure classes reported through [`crate::InstallResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallFailureKind {
    Network,
    NetworkDisabled,
    InvalidInput,
    Validation,
    Io,
    Cancelled,
    RestoreFailed,
}

impl std::fmt::Display for InstallFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InstallFailureKind::Network => "network",
            InstallFailureKind::NetworkDisabled => "network disabled",
            InstallFailureKind::InvalidInput => "invalid input",
            InstallFailureKind::Validation => "validation",
            InstallFailureKind::Io => "io",
            InstallFailureKind::Cancelled => "cancelled",
            InstallFailureKind::RestoreFailed => "restore failed",
        };
        f.write_str(label)
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Build a `map_err` adapter that attaches path and operation to an I/O error
    pub fn file_system<P: Into<PathBuf>>(
        path: P,
        operation: FileOperation,
    ) -> impl FnOnce(std::io::Error) -> InstallError {
        let path = path.into();
        move |source| InstallError::FileSystem { path, operation, source }
    }

    pub fn cancelled<S: Into<String>>(reason: S) -> Self {
        InstallError::Cancelled { reason: reason.into() }
    }

    /// Failure class exposed to callers
    pub fn kind(&self) -> InstallFailureKind {
        match self {
            InstallError::Network { .. } => InstallFailureKind::Network,
            InstallError::NetworkTimeout { .. } => InstallFailureKind::Network,
            InstallError::NetworkDisabled { .. } => InstallFailureKind::NetworkDisabled,
            InstallError::InvalidSource { .. } => InstallFailureKind::InvalidInput,
            InstallError::InvalidDescriptor { .. } => InstallFailureKind::InvalidInput,
            InstallError::SourceNotFound { .. } => InstallFailureKind::Io,
            InstallError::Validation { .. } => InstallFailureKind::Validation,
            InstallError::Archive { .. } => InstallFailureKind::Io,
            InstallError::FileSystem { .. } => InstallFailureKind::Io,
            InstallError::Cancelled { .. } => InstallFailureKind::Cancelled,
            InstallError::RestoreFailed { .. } => InstallFailureKind::RestoreFailed,
        }
    }

    /// Check if error is transient (network retries only)
    pub fn is_recoverable(&self) -> bool {
        match self {
            InstallError::Network { source, .. } => {
                // Only retry server-side trouble, not client errors (4xx)
                source
                    .status()
                    .map_or(true, |status| status.is_server_error() || status.as_u16() == 429)
            }
            InstallError::NetworkTimeout { .. } => true,
            InstallError::FileSystem { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            InstallError::NetworkDisabled { .. } => false,
            InstallError::InvalidSource { .. } => false,
            InstallError::InvalidDescriptor { .. } => false,
            InstallError::SourceNotFound { .. } => false,
            InstallError::Validation { .. } => false,
            InstallError::Archive { .. } => false,
            InstallError::Cancelled { .. } => false,
            InstallError::RestoreFailed { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            InstallError::Network { .. } => "network",
            InstallError::NetworkTimeout { .. } => "network_timeout",
            InstallError::NetworkDisabled { .. } => "network_disabled",
            InstallError::InvalidSource { .. } => "invalid_source",
            InstallError::InvalidDescriptor { .. } => "invalid_descriptor",
            InstallError::SourceNotFound { .. } => "source_not_found",
            InstallError::Validation { .. } => "validation",
            InstallError::Archive { .. } => "archive",
            InstallError::FileSystem { .. } => "file_system",
            InstallError::Cancelled { .. } => "cancelled",
            InstallError::RestoreFailed { .. } => "restore_failed",
        }
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            InstallError::Network { .. } => ErrorSeverity::Medium,
            InstallError::NetworkTimeout { .. } => ErrorSeverity::Medium,
            InstallError::NetworkDisabled { .. } => ErrorSeverity::Medium,
            InstallError::InvalidSource { .. } => ErrorSeverity::High,
            InstallError::InvalidDescriptor { .. } => ErrorSeverity::High,
            InstallError::SourceNotFound { .. } => ErrorSeverity::High,
            InstallError::Validation { .. } => ErrorSeverity::High,
            InstallError::Archive { .. } => ErrorSeverity::High,
            InstallError::FileSystem { .. } => ErrorSeverity::High,
            InstallError::Cancelled { .. } => ErrorSeverity::Low,
            InstallError::RestoreFailed { .. } => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            InstallError::NetworkTimeout { .. } => {
                Some("Check your internet connection or try increasing the timeout value")
            }
            InstallError::NetworkDisabled { .. } => {
                Some("Re-enable network access or place the package in the cache")
            }
            InstallError::InvalidSource { suggestion, .. } => Some(suggestion),
            InstallError::Validation { .. } => {
                Some("The download is not a mod package; check the source address")
            }
            InstallError::RestoreFailed { .. } => {
                Some("Copy the kept backup back to the install location by hand")
            }
            _ => None,
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Severity: {:?}\n", self.severity()));
        report.push_str(&format!("Recoverable: {}\n", self.is_recoverable()));

        if let Some(suggestion) = self.suggestion() {
            report.push_str(&format!("Suggestion: {}\n", suggestion));
        }

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_low_severity_and_not_recoverable() {
        let error = InstallError::cancelled("user request");
        assert_eq!(error.kind(), InstallFailureKind::Cancelled);
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn restore_failure_is_critical_and_reports_backup() {
        let original = InstallError::cancelled("user request");
        let error = InstallError::RestoreFailed {
            path: PathBuf::from("/mods/a"),
            backup: PathBuf::from("/tmp/backup/a"),
            original: Box::new(original),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        };

        assert_eq!(error.kind(), InstallFailureKind::RestoreFailed);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        let report = error.detailed_report();
        assert!(report.contains("/tmp/backup/a"));
        assert!(report.contains("Root cause: locked"));
    }

    #[test]
    fn file_system_adapter_keeps_context() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "try again");
        let error = InstallError::file_system("/mods/a.zip", FileOperation::Copy)(io);

        assert_eq!(error.kind(), InstallFailureKind::Io);
        assert!(error.is_recoverable());
        assert_eq!(error.to_string(), "File operation failed while copying '/mods/a.zip'");
    }
}
