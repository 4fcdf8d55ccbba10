//! Zip archive access
//!
//! Blocking helpers for inspecting, extracting and creating package
//! archives. Callers run them on the blocking pool via
//! `tokio::task::spawn_blocking` and hand in a clone of the cancellation
//! token, which is checked before every entry.

use std::fs::{self, File};
use std::io::{self, BufReader, Seek, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::{FileOperation, InstallError, Result};

/// What an inspection found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInspection {
    /// Name of the entry that matched the manifest
    pub manifest_entry: Option<String>,
    pub entry_count: usize,
}

/// Counters from an extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
}

/// True when a zip entry name is the manifest or ends in `/<manifest>`
pub fn is_manifest_entry(entry_name: &str, manifest_name: &str) -> bool {
    let normalized = entry_name.replace('\\', "/").to_lowercase();
    if normalized.ends_with('/') {
        return false;
    }
    let manifest = manifest_name.to_lowercase();
    normalized == manifest || normalized.ends_with(&format!("/{}", manifest))
}

/// Open an archive for reading
fn open_archive(archive_path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive_path)
        .map_err(InstallError::file_system(archive_path, FileOperation::Read))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| InstallError::Validation {
        file: archive_path.to_path_buf(),
        reason: format!("not a readable zip archive ({})", e),
    })
}

/// List entry names without extracting anything
pub fn inspect_archive(archive_path: &Path, manifest_name: &str) -> Result<ArchiveInspection> {
    let archive = open_archive(archive_path)?;
    let manifest_entry = archive
        .file_names()
        .find(|name| is_manifest_entry(name, manifest_name))
        .map(str::to_string);

    Ok(ArchiveInspection {
        manifest_entry,
        entry_count: archive.len(),
    })
}

/// Extract every entry of `archive_path` below `dest`
///
/// Entries whose names would escape `dest` are skipped.
pub fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats> {
    let mut archive = open_archive(archive_path)?;
    let mut stats = ExtractStats::default();

    fs::create_dir_all(dest).map_err(InstallError::file_system(dest, FileOperation::CreateDir))?;

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(InstallError::cancelled(format!(
                "extraction of {} interrupted",
                archive_path.display()
            )));
        }

        let mut entry = archive.by_index(index).map_err(|e| InstallError::Archive {
            path: archive_path.to_path_buf(),
            source: e,
        })?;

        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry '{}'", entry.name());
            stats.skipped += 1;
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(InstallError::file_system(&out_path, FileOperation::CreateDir))?;
            stats.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(InstallError::file_system(parent, FileOperation::CreateDir))?;
        }
        let mut out_file = File::create(&out_path)
            .map_err(InstallError::file_system(&out_path, FileOperation::Create))?;
        io::copy(&mut entry, &mut out_file)
            .map_err(InstallError::file_system(&out_path, FileOperation::Extract))?;
        stats.files += 1;
    }

    debug!(
        "Extracted {} into {} ({} files, {} dirs, {} skipped)",
        archive_path.display(),
        dest.display(),
        stats.files,
        stats.directories,
        stats.skipped
    );
    Ok(stats)
}

/// Write the contents of `dir` as a zip archive into `writer`
///
/// Entry names are relative to `dir` and use `/` separators. Traversal uses
/// an explicit stack.
pub fn write_directory_archive<W: Write + Seek>(
    dir: &Path,
    writer: W,
    cancel: &CancellationToken,
) -> Result<W> {
    let compress_error = |source: zip::result::ZipError| InstallError::Archive {
        path: dir.to_path_buf(),
        source,
    };
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries =
            fs::read_dir(&current).map_err(InstallError::file_system(&current, FileOperation::ReadDir))?;

        for entry in entries {
            if cancel.is_cancelled() {
                return Err(InstallError::cancelled(format!(
                    "archiving of {} interrupted",
                    dir.display()
                )));
            }

            let entry = entry.map_err(InstallError::file_system(&current, FileOperation::ReadDir))?;
            let path = entry.path();
            let name = entry_name(dir, &path);
            let file_type = entry
                .file_type()
                .map_err(InstallError::file_system(&path, FileOperation::Metadata))?;

            if file_type.is_dir() {
                zip.add_directory(format!("{}/", name), options)
                    .map_err(compress_error)?;
                pending.push(path);
            } else {
                zip.start_file(name, options).map_err(compress_error)?;
                let mut source = File::open(&path)
                    .map_err(InstallError::file_system(&path, FileOperation::Read))?;
                io::copy(&mut source, &mut zip)
                    .map_err(InstallError::file_system(&path, FileOperation::Compress))?;
            }
        }
    }

    zip.finish().map_err(compress_error)
}

fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn manifest_match_is_case_insensitive_suffix() {
        assert!(is_manifest_entry("modinfo.json", "modinfo.json"));
        assert!(is_manifest_entry("MyMod/ModInfo.JSON", "modinfo.json"));
        assert!(is_manifest_entry("MyMod\\modinfo.json", "modinfo.json"));
        assert!(!is_manifest_entry("MyMod/notmodinfo.json", "modinfo.json"));
        assert!(!is_manifest_entry("modinfo.json/", "modinfo.json"));
    }

    #[test]
    fn directory_archive_extracts_back_to_same_tree() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("assets/empty")).unwrap();
        fs::write(src.join("modinfo.json"), "{}").unwrap();
        fs::write(src.join("assets/texture.png"), [1u8, 2, 3]).unwrap();

        let token = CancellationToken::new();
        let bytes = write_directory_archive(&src, Cursor::new(Vec::new()), &token)
            .unwrap()
            .into_inner();
        let archive_path = temp.path().join("packed.zip");
        fs::write(&archive_path, bytes).unwrap();

        let inspection = inspect_archive(&archive_path, "modinfo.json").unwrap();
        assert_eq!(inspection.manifest_entry.as_deref(), Some("modinfo.json"));

        let out = temp.path().join("out");
        let stats = extract_archive(&archive_path, &out, &token).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(fs::read(out.join("assets/texture.png")).unwrap(), vec![1u8, 2, 3]);
        assert!(out.join("assets/empty").is_dir());
    }

    #[test]
    fn unreadable_archive_is_a_validation_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("not-a.zip");
        fs::write(&path, b"plain text").unwrap();

        let error = inspect_archive(&path, "modinfo.json").unwrap_err();
        assert!(matches!(error, InstallError::Validation { .. }));
    }
}
