//! Package cache
//!
//! Cached packages are zip archives keyed by package id and release version.
//! The cache serves two purposes: a downloaded release is kept so it never has
//! to be fetched again, and an outgoing release is stashed here before an
//! update replaces it.
//!
//! Every write is advisory. Callers use the `*_best_effort` helpers, which log
//! failures and never let them change the outcome of an install.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;

use crate::archive;
use crate::core::files::{ensure_parent_dir, path_exists};
use crate::core::{FileOperation, InstallError, PackageIdentity, Result};

/// Identifies one cached release of a package
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub package: PackageIdentity,
    pub version: Option<String>,
}

impl CacheKey {
    pub fn new(package: &PackageIdentity, version: Option<&str>) -> Self {
        Self {
            package: package.clone(),
            version: version.map(str::to_string),
        }
    }

    /// File-system safe stem: sanitized id, optional version, id hash
    pub fn file_stem(&self) -> String {
        let mut hashed = self.package.id.clone();
        if let Some(version) = &self.version {
            hashed.push('\0');
            hashed.push_str(version);
        }
        let digest = hex::encode(xxh64(hashed.as_bytes(), 0).to_be_bytes());
        format!("{}-{}", self.readable_stem(&self.package.id), digest)
    }

    /// Name used before hashed keys were introduced
    pub fn legacy_stem(&self) -> String {
        self.readable_stem(&self.package.id)
    }

    fn readable_stem(&self, base: &str) -> String {
        match &self.version {
            Some(version) => format!("{}-{}", sanitize(base), sanitize(version)),
            None => sanitize(base),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.package.id, version),
            None => write!(f, "{}", self.package.id),
        }
    }
}

fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() { "package".to_string() } else { cleaned }
}

/// Maps cache keys to on-disk locations
pub trait CacheLocator: Send + Sync {
    /// Canonical location of the entry
    fn entry_path(&self, key: &CacheKey) -> PathBuf;

    /// Older locations that may still hold the entry
    fn legacy_paths(&self, _key: &CacheKey) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// `<root>/<stem>.zip`, with the pre-hash names as legacy locations
#[derive(Debug, Clone)]
pub struct DefaultCacheLocator {
    root: PathBuf,
}

impl DefaultCacheLocator {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CacheLocator for DefaultCacheLocator {
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.zip", key.file_stem()))
    }

    fn legacy_paths(&self, key: &CacheKey) -> Vec<PathBuf> {
        let by_id = self.root.join(format!("{}.zip", key.legacy_stem()));
        let by_name = self
            .root
            .join(format!("{}.zip", key.readable_stem(&key.package.display_name)));

        if by_id == by_name {
            vec![by_id]
        } else {
            vec![by_id, by_name]
        }
    }
}

/// Reads and writes cache entries through a [`CacheLocator`]
#[derive(Clone)]
pub struct CacheStore {
    locator: Arc<dyn CacheLocator>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn new(locator: Arc<dyn CacheLocator>) -> Self {
        Self { locator }
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.locator.entry_path(key)
    }

    /// Return the canonical entry if one exists
    ///
    /// A legacy-located entry is promoted first. Promotion problems are
    /// logged and treated as a miss for that location.
    pub async fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        if let Err(e) = self.promote_legacy(key).await {
            warn!("Could not promote legacy cache entry for {}: {}", key, e);
        }

        let entry = self.entry_path(key);
        match path_exists(&entry).await {
            Ok(true) => {
                debug!("Cache hit for {} at {}", key, entry.display());
                Some(entry)
            }
            Ok(false) => None,
            Err(e) => {
                warn!("Could not check cache entry {}: {}", entry.display(), e);
                None
            }
        }
    }

    /// Move an entry from a legacy location into the canonical one
    ///
    /// Returns the canonical path when something was promoted. An existing
    /// canonical entry always wins over legacy copies.
    pub async fn promote_legacy(&self, key: &CacheKey) -> Result<Option<PathBuf>> {
        let entry = self.entry_path(key);
        if path_exists(&entry).await? {
            return Ok(None);
        }

        for legacy in self.locator.legacy_paths(key) {
            if legacy == entry || !path_exists(&legacy).await? {
                continue;
            }

            ensure_parent_dir(&entry).await?;
            tokio::fs::rename(&legacy, &entry)
                .await
                .map_err(InstallError::file_system(&legacy, FileOperation::Move))?;
            info!(
                "Promoted legacy cache entry {} to {}",
                legacy.display(),
                entry.display()
            );
            return Ok(Some(entry));
        }

        Ok(None)
    }

    /// Store a copy of the archive at `src` under `key`
    pub async fn store_file(&self, key: &CacheKey, src: &Path) -> Result<PathBuf> {
        let entry = self.entry_path(key);
        let source = src.to_path_buf();
        let destination = entry.clone();

        run_blocking(&entry, move || {
            write_atomically(&destination, |file| {
                let mut input = File::open(&source)
                    .map_err(InstallError::file_system(&source, FileOperation::Read))?;
                std::io::copy(&mut input, file)
                    .map_err(InstallError::file_system(&destination, FileOperation::Write))?;
                Ok(())
            })
        })
        .await?;

        debug!("Cached {} as {}", src.display(), entry.display());
        Ok(entry)
    }

    /// Zip the directory tree at `dir` and store it under `key`
    pub async fn store_directory(
        &self,
        key: &CacheKey,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let entry = self.entry_path(key);
        let source = dir.to_path_buf();
        let destination = entry.clone();
        let cancel = cancel.clone();

        run_blocking(&entry, move || {
            write_atomically(&destination, |file| {
                archive::write_directory_archive(&source, file, &cancel).map(|_| ())
            })
        })
        .await?;

        debug!("Cached directory {} as {}", dir.display(), entry.display());
        Ok(entry)
    }

    /// [`CacheStore::store_file`] that only logs failures
    pub async fn store_file_best_effort(&self, key: &CacheKey, src: &Path) -> bool {
        match self.store_file(key, src).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Caching {} as {} failed: {}", src.display(), key, e);
                false
            }
        }
    }

    /// [`CacheStore::store_directory`] that only logs failures
    pub async fn store_directory_best_effort(
        &self,
        key: &CacheKey,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> bool {
        match self.store_directory(key, dir, cancel).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Caching directory {} as {} failed: {}", dir.display(), key, e);
                false
            }
        }
    }
}

/// Write through a temporary sibling that is renamed over `destination`
fn write_atomically<F>(destination: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(InstallError::file_system(parent, FileOperation::CreateDir))?;

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(InstallError::file_system(parent, FileOperation::Create))?;
    write(temp.as_file_mut())?;
    temp.as_file()
        .sync_all()
        .map_err(InstallError::file_system(temp.path(), FileOperation::Write))?;
    temp.persist(destination)
        .map_err(|e| InstallError::file_system(destination, FileOperation::Move)(e.error))?;
    Ok(())
}

async fn run_blocking<F>(entry: &Path, task: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|e| {
        InstallError::file_system(entry, FileOperation::Write)(std::io::Error::other(e))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(version: Option<&str>) -> CacheKey {
        CacheKey::new(&PackageIdentity::new("author.cool-mod", "Cool Mod"), version)
    }

    #[test]
    fn versions_get_distinct_entries() {
        let locator = DefaultCacheLocator::new("/cache");
        let v1 = locator.entry_path(&key(Some("1.0.0")));
        let v2 = locator.entry_path(&key(Some("2.0.0")));
        let unversioned = locator.entry_path(&key(None));

        assert_ne!(v1, v2);
        assert_ne!(v1, unversioned);
        assert!(v1.starts_with("/cache"));
        assert!(v1.file_name().unwrap().to_string_lossy().starts_with("author.cool-mod-1.0.0-"));
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let key = CacheKey::new(&PackageIdentity::new("../evil/../id", "Evil"), None);
        let stem = key.file_stem();
        assert!(!stem.contains('/'));
        assert!(!stem.starts_with('.'));
    }

    #[tokio::test]
    async fn lookup_promotes_legacy_entry() {
        let temp = tempdir().unwrap();
        let locator = DefaultCacheLocator::new(temp.path());
        let legacy = temp.path().join("Cool_Mod-1.0.0.zip");
        tokio::fs::write(&legacy, b"legacy").await.unwrap();

        let store = CacheStore::new(Arc::new(locator.clone()));
        let found = store.lookup(&key(Some("1.0.0"))).await.unwrap();

        assert_eq!(found, locator.entry_path(&key(Some("1.0.0"))));
        assert!(!legacy.exists());
        assert_eq!(tokio::fs::read(found).await.unwrap(), b"legacy");
    }

    #[tokio::test]
    async fn store_file_replaces_existing_entry() {
        let temp = tempdir().unwrap();
        let store = CacheStore::new(Arc::new(DefaultCacheLocator::new(temp.path().join("cache"))));
        let src = temp.path().join("download.zip");

        tokio::fs::write(&src, b"first").await.unwrap();
        let entry = store.store_file(&key(None), &src).await.unwrap();
        tokio::fs::write(&src, b"second").await.unwrap();
        store.store_file(&key(None), &src).await.unwrap();

        assert_eq!(tokio::fs::read(&entry).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn best_effort_store_reports_failure_without_error() {
        let temp = tempdir().unwrap();
        let store = CacheStore::new(Arc::new(DefaultCacheLocator::new(temp.path().join("cache"))));

        let stored = store
            .store_file_best_effort(&key(None), &temp.path().join("missing.zip"))
            .await;
        assert!(!stored);
    }
}
