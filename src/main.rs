use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emrsync_core::config::{
    data_dir_from_env_value, profiles_file_from_env_value, purge_interval_from_env_value,
};
use emrsync_core::{
    CoreConfig, FileSyncRepository, ProfileService, PurgeSweeper, SyncArtifactService,
    SyncRepository,
};

/// Main entry point for the sync service
///
/// Imports the configured sync profiles, then runs the purge sweeper on a fixed interval
/// until Ctrl-C.
///
/// # Environment Variables
/// - `EMRSYNC_DATA_DIR`: Directory for sync data storage (default: "sync_data")
/// - `EMRSYNC_PROFILES_FILE`: YAML profile definitions imported at startup (optional)
/// - `EMRSYNC_PURGE_INTERVAL_SECS`: Seconds between purge sweeps (default: 3600)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emrsync=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(CoreConfig::new(
        data_dir_from_env_value(std::env::var("EMRSYNC_DATA_DIR").ok()),
        profiles_file_from_env_value(std::env::var("EMRSYNC_PROFILES_FILE").ok()),
        purge_interval_from_env_value(std::env::var("EMRSYNC_PURGE_INTERVAL_SECS").ok())?,
    )?);

    tracing::info!("++ Sync data in {}", cfg.data_dir().display());

    let repo: Arc<dyn SyncRepository> = Arc::new(FileSyncRepository::new(cfg.clone()));

    if let Some(file) = cfg.profiles_file() {
        let imported = ProfileService::new(repo.clone()).import_file(file)?;
        tracing::info!("++ Loaded {} sync profile(s) from {}", imported.len(), file.display());
    }

    let sweeper = PurgeSweeper::new(Arc::new(SyncArtifactService::new(repo)));
    let mut interval = tokio::time::interval(cfg.purge_interval());

    tracing::info!("++ Purging expired sync resources every {:?}", cfg.purge_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sweeper.sweep(chrono::Utc::now()) {
                    tracing::error!(error = %e, "purge sweep failed");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("++ Shutting down");
                break;
            }
        }
    }

    Ok(())
}
