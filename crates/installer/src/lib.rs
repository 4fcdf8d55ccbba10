//! Mod Installer Library
//!
//! This library installs game mod packages. A package is a zip archive that
//! contains a manifest file. It is fetched from a URL or a local path (or
//! straight from the package cache), validated, and installed either as a
//! single archive file or as an extracted directory tree. A failed or
//! cancelled install always leaves the previous installation in place.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mod_installer::{
//!     InstallDescriptor, Installer, InstallerConfig, IntoProgressCallback,
//!     LogProgressReporter, PackageIdentity, TargetKind,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mod_installer::Result<()> {
//! let installer = Installer::new(InstallerConfig::from_env())?;
//!
//! let descriptor = InstallDescriptor::new(
//!     PackageIdentity::new("author.better-maps", "Better Maps"),
//!     "https://mods.example.com/better-maps-1.2.0.zip",
//!     "/games/example/Mods/BetterMaps",
//!     TargetKind::Directory,
//! )
//! .with_version("1.2.0")
//! .with_previous_version("1.1.0");
//!
//! let cancel = CancellationToken::new();
//! let result = installer
//!     .install(
//!         &descriptor,
//!         true,
//!         Some(LogProgressReporter::new(true).into_callback()),
//!         &cancel,
//!     )
//!     .await;
//!
//! if !result.success {
//!     println!("Install failed: {}", result.error.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Cache first**: a cached release is used without any network access
//! - **Two install modes**: archive file or extracted directory tree
//! - **Rollback**: the previous installation is backed up next to itself and restored on failure
//! - **Cancellation**: observed between download chunks, archive entries and copied files
//! - **Retry logic**: transient network failures are retried with exponential backoff
//! - **Progress tracking**: ordered stage events through a single callback

pub mod archive;
pub mod cache;
pub mod config;
pub mod core;
pub mod install;
pub mod source;
pub mod validation;


// Re-export commonly used types for convenience
pub use cache::{CacheKey, CacheLocator, CacheStore, DefaultCacheLocator};
pub use config::{InstallerConfig, InstallerConfigBuilder};
pub use self::core::{
    CompositeProgressReporter, ErrorSeverity, FileOperation, InstallDescriptor, InstallError,
    InstallFailureKind, InstallResult, InstallStage, IntoProgressCallback, LogProgressReporter,
    NullProgressReporter, PackageIdentity, ProgressCallback, ProgressEvent, ProgressReporter,
    Result, TargetKind,
};
pub use install::{InstallOutcome, InstallPlan, InstallReport, Installer, PayloadRoot};
pub use source::{HttpTransport, NetworkAccess, PackageTransport, SourceLocation};
pub use validation::{PackageValidator, ValidatedPackage};
