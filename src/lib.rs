//! report-archiver -- moves finished execution reports from a remote
//! reporting server into local archival storage.
//!
//! This crate provides the archive pipeline (selection, download, extraction,
//! integrity verification, commit), its scheduler, and the health/info probes.

pub mod api;
pub mod archiver;
pub mod config;
pub mod execution;
pub mod remote;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::archiver::ReportsArchiver;
use crate::config::ArchiverConfig;
use crate::remote::HttpReportClient;
use crate::storage::SqliteMetadataStore;

/// Wire the archiver to the HTTP client and the SQLite metadata store.
pub fn build_archiver(config: &ArchiverConfig) -> Result<Arc<ReportsArchiver>> {
    config.validate()?;

    let client = HttpReportClient::new(
        &config.archiver.remote_server,
        config.archiver.request_timeout(),
    )?;
    let store = SqliteMetadataStore::open(&config.storage.db_path)?;

    Ok(Arc::new(ReportsArchiver::new(
        config,
        Arc::new(client),
        Arc::new(store),
    )))
}

/// Start the archiver daemon: scheduler loop and health/info probes.
pub async fn serve(config: ArchiverConfig) -> Result<()> {
    // 1. Initialize Storage + Archiver
    tracing::info!(db_path = %config.storage.db_path.display(), "Initializing database");
    let archiver = build_archiver(&config)?;

    // 2. Start Scheduler (background task)
    let trigger = scheduler::Trigger::from_config(&config.archiver)?;
    if archiver.is_enabled() {
        let scheduled = Arc::clone(&archiver);
        tokio::spawn(async move {
            scheduler::run_archive_loop(scheduled, trigger).await;
        });
    } else {
        tracing::info!("Reports archiver disabled by configuration");
    }

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    let app = api::router(api::state::AppState { archiver });

    tracing::info!(%addr, remote = %config.archiver.remote_server, "report-archiver listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
