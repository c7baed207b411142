// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use notefs::core::permissions::Identity;
use notefs::{Adapter, EntityStore, NoteDrive, Settings};

/// Mount a user's folders and notes as a filesystem.
#[derive(Debug, Parser)]
#[command(name = "notefs", version, about)]
struct Cli {
    /// Directory to mount on
    mountpoint: PathBuf,

    /// SQLite database (overrides `database_path`)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// TOML config file (default: ./notefs.toml if present)
    #[arg(short, long)]
    config: Option<String>,

    /// User id whose rows are mounted (overrides `owner`)
    #[arg(short, long)]
    user_id: Option<String>,

    /// Accept files without an extension
    #[arg(long)]
    allow_extensionless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(database) = cli.database {
        settings.database_path = database;
    }
    if let Some(user_id) = cli.user_id {
        settings.owner = user_id;
    }
    if cli.allow_extensionless {
        settings.policy.allow_extensionless = true;
    }
    settings.validate().context("invalid configuration")?;

    tracing::info!("=");
    tracing::info!("NoteFS Starting Up...");
    tracing::info!("=");
    tracing::info!("Mountpoint: {}", cli.mountpoint.display());
    tracing::info!("Database: {}", settings.database_path.display());
    tracing::info!("User: {}", settings.owner);

    // ========== ENTITY STORE ==========
    let store = EntityStore::open(&settings.database_path, settings.store.clone())
        .with_context(|| format!("opening {}", settings.database_path.display()))?;
    tracing::info!("✓ Entity Store ready");

    // ========== ADAPTER ==========
    let adapter = Arc::new(Adapter::new(Arc::new(store), settings.owner.clone(), settings.policy));
    tracing::info!(
        "✓ Adapter ready (extensionless: {}, editor scratch filter: {})",
        settings.policy.allow_extensionless, settings.policy.filter_editor_temp
    );

    // ========== NOTE DRIVE (FUSE) ==========
    let identity = Identity::capture();
    let options = identity.mount_options(&settings.mount);
    let drive = NoteDrive::new(
        Arc::clone(&adapter),
        identity,
        settings.mount.attr_ttl(),
        tokio::runtime::Handle::current(),
    );

    let session = fuser::spawn_mount2(drive, &cli.mountpoint, &options)
        .with_context(|| format!("mounting on {}", cli.mountpoint.display()))?;
    tracing::info!("✓ Mounted. Press Ctrl-C to unmount.");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("NoteFS shutting down...");

    // Unmounting runs destroy(), which flushes every open handle
    tokio::task::spawn_blocking(move || drop(session)).await?;
    adapter.release_all();
    Ok(())
}
