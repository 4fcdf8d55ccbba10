//! Command line front-end for the mod installer

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mod_installer::{
    CacheKey, InstallDescriptor, Installer, InstallerConfig, IntoProgressCallback,
    LogProgressReporter, PackageIdentity, TargetKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

#[derive(Parser, Debug)]
#[command(name = "modinstall")]
#[command(about = "Install game mod packages with rollback", long_about = None)]
struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or update a package
    Install(InstallArgs),
    /// Print where the cache keeps a package
    CachePath {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "release-version")]
        release_version: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// JSON descriptor file; replaces the individual descriptor flags
    #[arg(long, conflicts_with_all = ["id", "source", "target"])]
    descriptor: Option<PathBuf>,

    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: Option<String>,
    /// URL or local path of the package archive
    #[arg(long)]
    source: Option<String>,
    /// Absolute path that receives the package
    #[arg(long)]
    target: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = KindArg::Directory)]
    kind: KindArg,
    #[arg(long)]
    file_name: Option<String>,
    #[arg(long = "release-version")]
    release_version: Option<String>,
    #[arg(long)]
    previous_version: Option<String>,
    /// Location of the installed release when it differs from the target
    #[arg(long)]
    existing_path: Option<PathBuf>,

    /// Do not write downloads or backups to the cache
    #[arg(long)]
    no_cache: bool,
    /// Refuse any network access
    #[arg(long)]
    offline: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    File,
    Directory,
}

impl From<KindArg> for TargetKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::File => TargetKind::File,
            KindArg::Directory => TargetKind::Directory,
        }
    }
}

impl InstallArgs {
    fn descriptor(&self) -> Result<InstallDescriptor> {
        if let Some(path) = &self.descriptor {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading descriptor {}", path.display()))?;
            return serde_json::from_str(&json)
                .with_context(|| format!("parsing descriptor {}", path.display()));
        }

        let (Some(id), Some(source), Some(target)) = (&self.id, &self.source, &self.target) else {
            bail!("either --descriptor or --id, --source and --target are required");
        };
        let name = self.name.clone().unwrap_or_else(|| id.clone());

        let mut descriptor = InstallDescriptor::new(
            PackageIdentity::new(id.clone(), name),
            source.clone(),
            target.clone(),
            self.kind.into(),
        );
        descriptor.file_name = self.file_name.clone();
        descriptor.version = self.release_version.clone();
        descriptor.previous_version = self.previous_version.clone();
        descriptor.existing_path = self.existing_path.clone();
        Ok(descriptor)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = InstallerConfig::from_env();

    match cli.command {
        Commands::Install(args) => {
            let descriptor = args.descriptor()?;
            let installer = Installer::new(config)?;
            if args.offline {
                installer.network_access().set_disabled(true);
            }

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling install");
                    on_ctrl_c.cancel();
                }
            });

            let progress = LogProgressReporter::new(cli.verbose > 0).into_callback();
            let result = installer
                .install(&descriptor, !args.no_cache, Some(progress), &cancel)
                .await;

            if !result.success {
                bail!(
                    "install of {} failed ({}): {}",
                    descriptor.package,
                    result
                        .failure_kind
                        .map(|kind| kind.to_string())
                        .unwrap_or_default(),
                    result.error.unwrap_or_default()
                );
            }
            info!(
                "{} installed at {}{}",
                descriptor.package.display_name,
                descriptor.target.display(),
                if result.from_cache { " (from cache)" } else { "" }
            );
        }
        Commands::CachePath {
            id,
            name,
            release_version,
        } => {
            let installer = Installer::new(config)?;
            let name = name.unwrap_or_else(|| id.clone());
            let key = CacheKey::new(&PackageIdentity::new(id, name), release_version.as_deref());
            println!("{}", installer.cache().entry_path(&key).display());
        }
    }

    Ok(())
}
