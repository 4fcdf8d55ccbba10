//! Configuration types for the installer

use std::path::PathBuf;
use std::time::Duration;

/// Scratch directories live under `<temp>/<SCRATCH_DIR_NAME>/`
pub const SCRATCH_DIR_NAME: &str = "mod-installer";

/// Default manifest file every package must contain
pub const DEFAULT_MANIFEST_NAME: &str = "modinfo.json";

/// Configuration for install operations
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Root under which each call creates its own uniquely named folder
    pub scratch_root: PathBuf,
    /// Directory holding cached package archives
    pub cache_root: PathBuf,
    /// File name that marks an archive as a package (case-insensitive)
    pub manifest_name: String,
    /// Start with network access disabled
    pub offline: bool,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: usize,
    /// Initial delay between retries (doubles each retry)
    pub retry_delay: Duration,
    /// Maximum retry delay cap
    pub max_retry_delay: Duration,
    #[cfg(test)]
    pub(crate) faults: FaultInjector,
}

impl InstallerConfig {
    pub fn builder() -> InstallerConfigBuilder {
        InstallerConfigBuilder::new()
    }

    /// Defaults overlaid with `MOD_INSTALLER_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("MOD_INSTALLER_SCRATCH_ROOT") {
            config.scratch_root = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("MOD_INSTALLER_CACHE_ROOT") {
            config.cache_root = PathBuf::from(root);
        }
        if let Ok(name) = std::env::var("MOD_INSTALLER_MANIFEST") {
            if !name.trim().is_empty() {
                config.manifest_name = name;
            }
        }
        if let Ok(flag) = std::env::var("MOD_INSTALLER_OFFLINE") {
            config.offline = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }
}

fn default_cache_root() -> PathBuf {
    directories::ProjectDirs::from("", "", SCRATCH_DIR_NAME)
        .map(|dirs| dirs.cache_dir().join("packages"))
        .unwrap_or_else(|| std::env::temp_dir().join(SCRATCH_DIR_NAME).join("cache"))
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join(SCRATCH_DIR_NAME),
            cache_root: default_cache_root(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            offline: false,
            timeout: Duration::from_secs(30),
            user_agent: format!("mod-installer/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(60),
            #[cfg(test)]
            faults: FaultInjector::default(),
        }
    }
}

/// Builder for [`InstallerConfig`]
#[derive(Debug, Clone, Default)]
pub struct InstallerConfigBuilder {
    config: InstallerConfig,
}

impl InstallerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scratch_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.scratch_root = root.into();
        self
    }

    pub fn cache_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.cache_root = root.into();
        self
    }

    pub fn manifest_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.manifest_name = name.into();
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = delay;
        self
    }

    #[cfg(test)]
    pub(crate) fn faults(mut self, faults: FaultInjector) -> Self {
        self.config.faults = faults;
        self
    }

    pub fn build(self) -> InstallerConfig {
        self.config
    }
}

/// Simulated storage failures and cancellations for rollback tests
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultInjector {
    /// Fail the directory merge once this many files were copied
    pub fail_merge_after_files: Option<usize>,
    /// Fail the file-mode copy after writing half of the new file
    pub fail_file_copy: bool,
    /// Cancel the directory merge once this many files were copied
    pub cancel_merge_after_files: Option<usize>,
    /// Copy the previous directory into its backup, then fail while only
    /// part of it was deleted
    pub fail_backup_source_removal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = InstallerConfig::builder()
            .scratch_root("/tmp/scratch")
            .cache_root("/tmp/cache")
            .manifest_name("mod.json")
            .max_retries(0)
            .build();

        assert_eq!(config.scratch_root, PathBuf::from("/tmp/scratch"));
        assert_eq!(config.cache_root, PathBuf::from("/tmp/cache"));
        assert_eq!(config.manifest_name, "mod.json");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn default_scratch_root_is_under_temp() {
        let config = InstallerConfig::default();
        assert!(config.scratch_root.starts_with(std::env::temp_dir()));
        assert!(config.scratch_root.ends_with(SCRATCH_DIR_NAME));
    }
}
