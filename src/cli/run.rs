use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::archive::{ArchiveError, DownloadArchive};
use crate::config::{load_config, Config, ConfigError};
use crate::source::{NitroboxSource, SourceError};
use crate::storage::{FileIdentStore, StoreError};
use crate::watch::WatchSupervisor;
use crate::web::run_server;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("config not found; searched ~/.config/docwatch/config.yml and /etc/docwatch/config.yml (use --config <path> or 'docwatch config init')")]
    ConfigNotFound,

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("document source error: {0}")]
    Source(#[from] SourceError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Load config, reconcile the archive and serve until Ctrl+C.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path.as_deref())?;

    info!(path = %config.store.path.display(), "Opening ident store");
    let store = Arc::new(FileIdentStore::open(&config.store.path).await?);

    info!(path = %config.archive.path.display(), "Opening download archive");
    let archive = Arc::new(DownloadArchive::open(&config.archive.path, &config.archive.extension).await?);

    let source = Arc::new(NitroboxSource::new(&config.source)?);

    // Reconcile failures stop startup here
    let supervisor =
        Arc::new(WatchSupervisor::start(source, store, archive, config.watch.clone()).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(listen = %config.web.listen, "Starting web server");
    let web_config = config.web.clone();
    let mut web_handle = tokio::spawn(run_server(supervisor.clone(), web_config, shutdown_rx));

    info!("docwatch started, press Ctrl+C to shutdown");

    let server_exited = tokio::select! {
        _ = signal::ctrl_c() => false,
        result = &mut web_handle => {
            // Stopped without a shutdown request, most likely a bind failure
            result??;
            true
        }
    };

    if !server_exited {
        info!(active_watches = supervisor.active_count(), "Shutdown signal received");
        let _ = shutdown_tx.send(true);
        web_handle.await??;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Run the archive reconcile pass once and print what it did.
pub async fn reconcile(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path.as_deref())?;

    let archive = DownloadArchive::open(&config.archive.path, &config.archive.extension).await?;
    let report = archive.reconcile().await.map_err(|e| {
        error!(error = %e, "Reconcile failed");
        e
    })?;

    println!(
        "Reconciled {}: kept {}, removed {} superseded, removed {} interrupted",
        archive.dir().display(),
        report.kept,
        report.removed,
        report.temp_removed
    );
    Ok(())
}

fn load(config_path: Option<&Path>) -> Result<Config, RunError> {
    let path = config_path.ok_or(RunError::ConfigNotFound)?;
    info!(config_path = %path.display(), "Loading configuration");
    Ok(load_config(path)?)
}
