//! HTTP transport
//!
//! Streams a package into a `.part` sibling of the destination and renames
//! it into place once the body is complete. Transient failures are retried
//! with exponential backoff; cancellation aborts the transfer immediately.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::PackageTransport;
use crate::config::InstallerConfig;
use crate::core::files::{ensure_parent_dir, remove_path_best_effort};
use crate::core::{FileOperation, InstallError, InstallStage, ProgressSink, Result};

/// Minimum spacing between progress events for one transfer
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Streaming HTTP downloader
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    max_retries: usize,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl HttpTransport {
    pub fn from_config(config: &InstallerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| InstallError::Network {
                url: "<client>".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            timeout: config.timeout,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            max_retry_delay: config.max_retry_delay,
        })
    }

    fn retry_strategy(&self) -> std::iter::Take<ExponentialBackoff> {
        // from_millis(2) yields 2, 4, 8... so a factor of delay/2 starts at delay
        let factor = self.retry_delay.as_millis() as u64 / 2;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_retry_delay)
            .take(self.max_retries)
    }

    fn network_error(&self, url: &Url, error: reqwest::Error) -> InstallError {
        if error.is_timeout() {
            InstallError::NetworkTimeout {
                url: url.to_string(),
                duration_secs: self.timeout.as_secs(),
            }
        } else {
            InstallError::Network {
                url: url.to_string(),
                source: error,
            }
        }
    }

    /// One transfer attempt into `part`
    async fn download_once(&self, url: &Url, part: &Path, progress: &ProgressSink) -> Result<u64> {
        debug!("Stream downloading: {} to {}", url, part.display());

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.network_error(url, e))?
            .error_for_status()
            .map_err(|e| self.network_error(url, e))?;

        let total_size = response.content_length();
        let mut file = fs::File::create(part)
            .await
            .map_err(InstallError::file_system(part, FileOperation::Create))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_progress_time = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.network_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(InstallError::file_system(part, FileOperation::Write))?;
            downloaded += chunk.len() as u64;

            if last_progress_time.elapsed() >= PROGRESS_INTERVAL {
                let message = match total_size {
                    Some(total) => format!("{} of {} bytes", downloaded, total),
                    None => format!("{} bytes", downloaded),
                };
                progress.emit(InstallStage::Downloading, message);
                last_progress_time = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(InstallError::file_system(part, FileOperation::Write))?;
        file.sync_all()
            .await
            .map_err(InstallError::file_system(part, FileOperation::Write))?;

        Ok(downloaded)
    }

    async fn download_with_retry(&self, url: &Url, part: &Path, progress: &ProgressSink) -> Result<u64> {
        RetryIf::spawn(
            self.retry_strategy(),
            || self.download_once(url, part, progress),
            |error: &InstallError| {
                let retry = error.is_recoverable();
                if retry {
                    warn!("Transfer of {} failed, retrying: {}", url, error);
                } else {
                    debug!("Error is not recoverable, failing immediately: {}", error);
                }
                retry
            },
        )
        .await
    }
}

#[async_trait]
impl PackageTransport for HttpTransport {
    async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        ensure_parent_dir(dest).await?;
        let part = part_path(dest);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InstallError::cancelled(format!("download of {} interrupted", url))),
            result = self.download_with_retry(url, &part, progress) => result,
        };

        let size = match outcome {
            Ok(size) => size,
            Err(e) => {
                remove_path_best_effort(&part).await;
                return Err(e);
            }
        };

        fs::rename(&part, dest)
            .await
            .map_err(InstallError::file_system(&part, FileOperation::Move))?;
        debug!("Stream download completed: {} bytes", size);
        Ok(size)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
