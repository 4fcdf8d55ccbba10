//! Install orchestration
//!
//! [`Installer`] drives one install call end to end:
//!
//! 1. resolve the package bytes (cache, local file or network)
//! 2. validate the archive
//! 3. decide between a fresh install and an update ([`InstallPlan`])
//! 4. hand off to the strategy selected by the target kind
//!
//! Everything that mutates the target lives in the strategies, including the
//! [`Backup`] of a previous installation. The orchestrator only owns the
//! scratch directory and turns errors into an [`InstallResult`].

pub mod backup;
pub mod directory;
pub mod file;
pub mod scratch;

pub use backup::Backup;
pub use directory::{DirectoryInstaller, PayloadRoot};
pub use file::FileInstaller;
pub use scratch::ScratchSpace;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheLocator, CacheStore, DefaultCacheLocator};
use crate::config::InstallerConfig;
use crate::core::{
    ErrorSeverity, FileOperation, InstallDescriptor, InstallError, InstallResult, InstallStage,
    ProgressCallback, ProgressSink, Result, TargetKind,
};
use crate::source::{HttpTransport, NetworkAccess, PackageTransport, SourceResolver};
use crate::validation::{PackageValidator, ValidatedPackage};

/// Fresh install or replacement of a previous installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPlan {
    /// Nothing exists at the target or the existing path
    Fresh,
    /// A previous installation exists at `existing`
    Update {
        existing: PathBuf,
        /// `existing` differs from the target, so it is removed on success
        renamed: bool,
    },
}

impl InstallPlan {
    /// Inspect the filesystem for a previous installation
    ///
    /// The descriptor's `existing_path` wins when it exists. A previous
    /// installation whose type contradicts the target kind is rejected rather
    /// than reinterpreted.
    pub async fn resolve(descriptor: &InstallDescriptor) -> Result<Self> {
        let target_state = probe(&descriptor.target).await?;

        let plan = match descriptor.existing_path.as_deref() {
            Some(existing) if descriptor.is_renamed() => {
                let existing_state = probe(existing).await?;
                match (existing_state, target_state) {
                    (Some(_), Some(_)) => {
                        return Err(descriptor.invalid(format!(
                            "both the existing path '{}' and the target '{}' exist",
                            existing.display(),
                            descriptor.target.display()
                        )));
                    }
                    (Some(is_dir), None) => {
                        check_kind(descriptor, existing, is_dir)?;
                        InstallPlan::Update {
                            existing: existing.to_path_buf(),
                            renamed: true,
                        }
                    }
                    (None, Some(is_dir)) => {
                        check_kind(descriptor, &descriptor.target, is_dir)?;
                        InstallPlan::Update {
                            existing: descriptor.target.clone(),
                            renamed: false,
                        }
                    }
                    (None, None) => InstallPlan::Fresh,
                }
            }
            _ => match target_state {
                Some(is_dir) => {
                    check_kind(descriptor, &descriptor.target, is_dir)?;
                    InstallPlan::Update {
                        existing: descriptor.target.clone(),
                        renamed: false,
                    }
                }
                None => InstallPlan::Fresh,
            },
        };

        debug!("Install plan for {}: {:?}", descriptor.package.id, plan);
        Ok(plan)
    }

    pub fn existing(&self) -> Option<&Path> {
        match self {
            InstallPlan::Fresh => None,
            InstallPlan::Update { existing, .. } => Some(existing),
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, InstallPlan::Update { .. })
    }
}

/// `Some(is_dir)` when the path exists
async fn probe(path: &Path) -> Result<Option<bool>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.is_dir())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(InstallError::file_system(path, FileOperation::Metadata)(e)),
    }
}

fn check_kind(descriptor: &InstallDescriptor, path: &Path, is_dir: bool) -> Result<()> {
    let matches = match descriptor.target_kind {
        TargetKind::File => !is_dir,
        TargetKind::Directory => is_dir,
    };
    if matches {
        Ok(())
    } else {
        Err(descriptor.invalid(format!(
            "'{}' exists but is not a {}",
            path.display(),
            descriptor.target_kind
        )))
    }
}

/// Everything a strategy needs for one call
pub struct InstallContext<'a> {
    pub descriptor: &'a InstallDescriptor,
    pub package: &'a ValidatedPackage,
    pub plan: &'a InstallPlan,
    pub scratch: &'a ScratchSpace,
    pub cache: &'a CacheStore,
    pub use_cache: bool,
    pub progress: &'a ProgressSink,
    pub cancel: &'a CancellationToken,
}

impl InstallContext<'_> {
    /// Cache key for the outgoing release, unless it would collide with the
    /// incoming one
    pub fn backup_cache_key(&self) -> Option<CacheKey> {
        if !self.use_cache {
            return None;
        }
        let incoming = CacheKey::new(&self.descriptor.package, self.descriptor.version.as_deref());
        let outgoing = CacheKey::new(
            &self.descriptor.package,
            self.descriptor.previous_version.as_deref(),
        );
        if outgoing == incoming {
            debug!(
                "Skipping backup caching for {}: outgoing release has the same key",
                incoming
            );
            None
        } else {
            Some(outgoing)
        }
    }

    pub fn check_cancelled(&self, step: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(InstallError::cancelled(format!("cancelled while {}", step)))
        } else {
            Ok(())
        }
    }
}

/// What a strategy did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Which folder of the extracted archive was installed (directory mode)
    pub payload_root: Option<PayloadRoot>,
    /// The outgoing release was written to the cache
    pub backup_cached: bool,
    pub files_installed: usize,
}

/// Successful result of [`Installer::try_install`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub plan: InstallPlan,
    pub from_cache: bool,
    pub downloaded: bool,
    /// The downloaded release was written to the cache
    pub download_cached: bool,
    pub report: InstallReport,
}

/// Install strategy selected by [`TargetKind`]
#[derive(Debug, Clone)]
pub enum InstallStrategy {
    File(FileInstaller),
    Directory(DirectoryInstaller),
}

impl InstallStrategy {
    pub fn for_kind(kind: TargetKind, config: &InstallerConfig) -> Self {
        match kind {
            TargetKind::File => InstallStrategy::File(FileInstaller::from_config(config)),
            TargetKind::Directory => {
                InstallStrategy::Directory(DirectoryInstaller::from_config(config))
            }
        }
    }

    pub async fn install(&self, ctx: &InstallContext<'_>) -> Result<InstallReport> {
        match self {
            InstallStrategy::File(installer) => installer.install(ctx).await,
            InstallStrategy::Directory(installer) => installer.install(ctx).await,
        }
    }
}

/// Build the error reported when a rollback could not put things back
pub(crate) fn restore_failed(
    path: &Path,
    backup: &Path,
    original: InstallError,
    failure: InstallError,
) -> InstallError {
    let source = match failure {
        InstallError::FileSystem { source, .. } => source,
        other => std::io::Error::other(other.to_string()),
    };
    InstallError::RestoreFailed {
        path: path.to_path_buf(),
        backup: backup.to_path_buf(),
        original: Box::new(original),
        source,
    }
}

/// Installs mod packages
///
/// One `Installer` can serve any number of install calls, including
/// concurrent calls for different packages. Calls that target the same path
/// must be serialized by the caller.
pub struct Installer {
    config: InstallerConfig,
    validator: PackageValidator,
    cache: CacheStore,
    transport: Arc<dyn PackageTransport>,
    network: NetworkAccess,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .field("network_disabled", &self.network.is_disabled())
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        let cache = CacheStore::new(Arc::new(DefaultCacheLocator::new(&config.cache_root)));

        Ok(Self {
            validator: PackageValidator::new(config.manifest_name.clone()),
            network: NetworkAccess::new(config.offline),
            transport: Arc::new(transport),
            cache,
            config,
        })
    }

    /// Replace the network transport
    pub fn with_transport(mut self, transport: Arc<dyn PackageTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the cache layout
    pub fn with_cache_locator(mut self, locator: Arc<dyn CacheLocator>) -> Self {
        self.cache = CacheStore::new(locator);
        self
    }

    /// Share a network switch with other components
    pub fn with_network_access(mut self, network: NetworkAccess) -> Self {
        self.network = network;
        self
    }

    pub fn network_access(&self) -> &NetworkAccess {
        &self.network
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Install a package
    ///
    /// Never fails: every error is captured in the returned
    /// [`InstallResult`]. `use_cache` controls whether the downloaded
    /// release and the outgoing release are written to the cache; an
    /// existing cache entry is always used.
    pub async fn install(
        &self,
        descriptor: &InstallDescriptor,
        use_cache: bool,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> InstallResult {
        match self.try_install(descriptor, use_cache, progress, cancel).await {
            Ok(outcome) => InstallResult::succeeded(outcome.from_cache),
            Err(e) => {
                match e.severity() {
                    ErrorSeverity::Critical => error!("{}", e.detailed_report()),
                    ErrorSeverity::Low => info!("Install of {} stopped: {}", descriptor.package, e),
                    _ => warn!("Install of {} failed: {}", descriptor.package, e),
                }
                InstallResult::failed(&e)
            }
        }
    }

    /// Install a package, returning typed errors
    pub async fn try_install(
        &self,
        descriptor: &InstallDescriptor,
        use_cache: bool,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome> {
        descriptor.check()?;
        let sink = ProgressSink::new(progress);
        let scratch = ScratchSpace::create(&self.config.scratch_root).await?;

        let result = self.run(descriptor, use_cache, &sink, &scratch, cancel).await;
        scratch.close().await;
        result
    }

    async fn run(
        &self,
        descriptor: &InstallDescriptor,
        use_cache: bool,
        progress: &ProgressSink,
        scratch: &ScratchSpace,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome> {
        info!(
            "Installing {} into {} ({})",
            descriptor.package,
            descriptor.target.display(),
            descriptor.target_kind
        );

        // Phase 1: get the package onto local disk
        let resolver = SourceResolver::new(&self.cache, self.transport.as_ref(), &self.network);
        let resolved = resolver.resolve(descriptor, scratch, progress, cancel).await?;

        // Phase 2: validate before touching anything
        if cancel.is_cancelled() {
            return Err(InstallError::cancelled("cancelled before validation"));
        }
        progress.emit(
            InstallStage::Validating,
            format!("Validating {}", descriptor.package.display_name),
        );
        let package = self.validator.validate(&resolved.path).await?;

        let download_cached = if use_cache && resolved.downloaded {
            let key = CacheKey::new(&descriptor.package, descriptor.version.as_deref());
            self.cache.store_file_best_effort(&key, &package.path).await
        } else {
            false
        };

        // Phase 3: fresh install or update
        if cancel.is_cancelled() {
            return Err(InstallError::cancelled("cancelled before preparing"));
        }
        let plan = InstallPlan::resolve(descriptor).await?;
        let message = match &plan {
            InstallPlan::Fresh => format!("Preparing fresh install of {}", descriptor.package.display_name),
            InstallPlan::Update { existing, .. } => format!(
                "Preparing update of {} at {}",
                descriptor.package.display_name,
                existing.display()
            ),
        };
        progress.emit(InstallStage::Preparing, message);

        // Phase 4: replace
        let ctx = InstallContext {
            descriptor,
            package: &package,
            plan: &plan,
            scratch,
            cache: &self.cache,
            use_cache,
            progress,
            cancel,
        };
        let report = InstallStrategy::for_kind(descriptor.target_kind, &self.config)
            .install(&ctx)
            .await?;

        progress.emit(
            InstallStage::Completed,
            format!("Installed {}", descriptor.package.display_name),
        );
        info!(
            "Installed {} at {} (from cache: {})",
            descriptor.package,
            descriptor.target.display(),
            resolved.from_cache
        );

        Ok(InstallOutcome {
            plan,
            from_cache: resolved.from_cache,
            downloaded: resolved.downloaded,
            download_cached,
            report,
        })
    }
}
