//! Installs a locally built package twice: once fresh, once as an update
//!
//! 1. Build a small package archive in a temporary folder
//! 2. Install it as a directory
//! 3. Install a second release over it, which pushes the first into the cache

use mod_installer::{
    InstallDescriptor, Installer, InstallerConfig, PackageIdentity, ProgressCallback,
    ProgressEvent, TargetKind,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

fn write_package(path: &Path, version: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path)?);
    let options = SimpleFileOptions::default();
    zip.start_file("BetterMaps/modinfo.json", options)?;
    write!(zip, r#"{{"id":"demo.better-maps","version":"{}"}}"#, version)?;
    zip.start_file("BetterMaps/maps/overworld.dat", options)?;
    zip.write_all(version.as_bytes())?;
    zip.finish()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempfile::tempdir()?;
    let config = InstallerConfig::builder()
        .scratch_root(workspace.path().join("scratch"))
        .cache_root(workspace.path().join("cache"))
        .build();
    let installer = Installer::new(config)?;

    let target = workspace.path().join("game/Mods/BetterMaps");
    let identity = PackageIdentity::new("demo.better-maps", "Better Maps");
    let cancel = CancellationToken::new();
    let progress: ProgressCallback = Arc::new(|event: ProgressEvent| {
        println!("[{}] {}", event.stage, event.message);
    });

    for (version, previous) in [("1.0.0", None), ("1.1.0", Some("1.0.0"))] {
        let archive = workspace.path().join(format!("better-maps-{}.zip", version));
        write_package(&archive, version)?;

        let mut descriptor = InstallDescriptor::new(
            identity.clone(),
            archive.to_string_lossy(),
            &target,
            TargetKind::Directory,
        )
        .with_version(version);
        descriptor.previous_version = previous.map(str::to_string);

        let result = installer
            .install(&descriptor, true, Some(progress.clone()), &cancel)
            .await;
        println!("{} -> success: {}, error: {:?}", version, result.success, result.error);
    }

    let installed = std::fs::read_to_string(target.join("maps/overworld.dat"))?;
    println!("Installed release: {}", installed);
    Ok(())
}
