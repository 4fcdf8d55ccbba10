//! Local file sources

use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::files::{copy_file, path_exists};
use crate::core::{InstallError, Result};

/// Copy a package that already sits on local disk into scratch space
///
/// The original file is never modified or consumed.
pub async fn copy_local_source(src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
    if !path_exists(src).await? || src.is_dir() {
        return Err(InstallError::SourceNotFound {
            path: src.to_path_buf(),
        });
    }
    if cancel.is_cancelled() {
        return Err(InstallError::cancelled("cancelled before copying local source"));
    }

    let size = copy_file(src, dest).await?;
    debug!("Staged local package {} ({} bytes)", src.display(), size);
    Ok(size)
}
