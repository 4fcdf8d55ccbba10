//! Source resolution
//!
//! Gets package bytes onto local disk. The cache is consulted first; on a
//! miss the package is copied from a local path or transferred from the
//! network into the per-call scratch directory.

pub mod http;
pub mod local;

pub use http::HttpTransport;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheKey, CacheStore};
use crate::core::{InstallDescriptor, InstallError, InstallStage, ProgressSink, Result};
use crate::install::scratch::ScratchSpace;

/// File name used when neither the descriptor nor the URL provides one
pub const FALLBACK_FILE_NAME: &str = "package.zip";

/// Shared switch that forbids any network access
///
/// Clones share the same flag, so a front-end can flip it while installs are
/// queued.
#[derive(Debug, Clone, Default)]
pub struct NetworkAccess {
    disabled: Arc<AtomicBool>,
}

impl NetworkAccess {
    pub fn new(disabled: bool) -> Self {
        Self {
            disabled: Arc::new(AtomicBool::new(disabled)),
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

/// Transfers a remote package to a local file
#[async_trait]
pub trait PackageTransport: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written
    async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Where a descriptor's `source` points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote(Url),
    Local(PathBuf),
}

impl SourceLocation {
    /// Interpret a source string as a URL or a local path
    ///
    /// `http`/`https` URLs are remote, `file` URLs and plain paths (including
    /// Windows drive paths) are local. Anything else is rejected.
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        match Url::parse(source) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(SourceLocation::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(SourceLocation::Local)
                    .map_err(|_| InstallError::InvalidSource {
                        uri: source.to_string(),
                        suggestion: "file URL does not name a local path".to_string(),
                    }),
                scheme if scheme.len() == 1 => Ok(SourceLocation::Local(PathBuf::from(source))),
                scheme => Err(InstallError::InvalidSource {
                    uri: source.to_string(),
                    suggestion: format!("unsupported scheme '{}' (supported: http, https, file)", scheme),
                }),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(SourceLocation::Local(PathBuf::from(source)))
            }
            Err(e) => Err(InstallError::InvalidSource {
                uri: source.to_string(),
                suggestion: match e {
                    url::ParseError::EmptyHost => "URL must have a valid hostname".to_string(),
                    url::ParseError::InvalidPort => {
                        "Port number must be between 1 and 65535".to_string()
                    }
                    other => format!("Check URL format ({})", other),
                },
            }),
        }
    }
}

/// Local payload produced by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: PathBuf,
    /// The payload is a cache entry
    pub from_cache: bool,
    /// The payload was transferred over the network during this call
    pub downloaded: bool,
}

/// Resolves a descriptor to local package bytes
pub struct SourceResolver<'a> {
    cache: &'a CacheStore,
    transport: &'a dyn PackageTransport,
    network: &'a NetworkAccess,
}

impl<'a> SourceResolver<'a> {
    pub fn new(
        cache: &'a CacheStore,
        transport: &'a dyn PackageTransport,
        network: &'a NetworkAccess,
    ) -> Self {
        Self {
            cache,
            transport,
            network,
        }
    }

    pub async fn resolve(
        &self,
        descriptor: &InstallDescriptor,
        scratch: &ScratchSpace,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource> {
        if cancel.is_cancelled() {
            return Err(InstallError::cancelled("cancelled before resolving source"));
        }

        let key = CacheKey::new(&descriptor.package, descriptor.version.as_deref());
        if let Some(path) = self.cache.lookup(&key).await {
            info!("Using cached package for {} from {}", key, path.display());
            return Ok(ResolvedSource {
                path,
                from_cache: true,
                downloaded: false,
            });
        }

        let location = SourceLocation::parse(&descriptor.source)?;
        let dest = scratch.download_dir().join(download_file_name(descriptor, &location));

        match location {
            SourceLocation::Local(path) => {
                progress.emit(
                    InstallStage::Downloading,
                    format!("Copying {} from {}", descriptor.package.display_name, path.display()),
                );
                local::copy_local_source(&path, &dest, cancel).await?;
                Ok(ResolvedSource {
                    path: dest,
                    from_cache: false,
                    downloaded: false,
                })
            }
            SourceLocation::Remote(url) => {
                if self.network.is_disabled() {
                    return Err(InstallError::NetworkDisabled {
                        package: descriptor.package.id.clone(),
                    });
                }

                progress.emit(
                    InstallStage::Downloading,
                    format!("Downloading {} from {}", descriptor.package.display_name, url),
                );
                let size = self.transport.fetch(&url, &dest, progress, cancel).await?;
                debug!("Fetched {} ({} bytes) to {}", url, size, dest.display());
                Ok(ResolvedSource {
                    path: dest,
                    from_cache: false,
                    downloaded: true,
                })
            }
        }
    }
}

/// Declared file name, else the last URL/path segment, else a fixed name
fn download_file_name(descriptor: &InstallDescriptor, location: &SourceLocation) -> String {
    let declared = descriptor
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned());

    let derived = match location {
        SourceLocation::Remote(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string),
        SourceLocation::Local(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    };

    declared
        .or(derived)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
