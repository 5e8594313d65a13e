// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! product-sync worker: moves staged products to the consolidated store on a cron cadence.
//!
//! Configured through `SYNC_*` environment variables (a `.env` file is honored).
//! Logging follows `RUST_LOG`, defaulting to `info`.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use product_sync::{
    AuditSink, FanoutAuditSink, SqlAuditSink, SqlStore, SyncConfig, SyncEngine, SyncTrigger,
    TracingAuditSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenv::dotenv() {
        // A missing .env is the normal case in deployed environments
        if !e.not_found() {
            eprintln!("failed to read .env: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SyncConfig::from_env()?;
    let origin_url = config.origin_url.as_deref().context("SYNC_ORIGIN_URL is not set")?;
    let destination_url = config
        .destination_url
        .as_deref()
        .context("SYNC_DESTINATION_URL is not set")?;

    let pool = config.pool_settings();
    let origin = SqlStore::connect(origin_url, &pool).await.context("connecting to staging store")?;
    let destination = SqlStore::connect(destination_url, &pool)
        .await
        .context("connecting to consolidated store")?;

    if config.bootstrap_schema {
        origin.ensure_origin_schema().await?;
        destination.ensure_destination_schema().await?;
    }

    let mut audit = FanoutAuditSink::new().with(Arc::new(TracingAuditSink));
    if config.audit_to_db {
        if config.bootstrap_schema {
            destination.ensure_audit_schema().await?;
        }
        audit = audit.with(Arc::new(SqlAuditSink::from_store(&destination)));
    }
    let audit: Arc<dyn AuditSink> = Arc::new(audit);

    let engine = SyncEngine::from_config(&config, Arc::new(origin), Arc::new(destination), audit);
    let trigger = Arc::new(SyncTrigger::from_config(Arc::new(engine), &config)?);

    info!(
        cron = %config.cron_expression,
        batch_size = config.batch_size,
        audit_to_db = config.audit_to_db,
        "product-sync started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(trigger.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("Shutdown requested");
    if shutdown_tx.send(true).is_err() {
        warn!("Trigger already stopped");
    }
    runner.await?;

    Ok(())
}
