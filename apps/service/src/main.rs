mod aggregate;
mod alert;
mod config;
mod database;
mod engine;
mod monitoring;
mod pool;
mod vuln;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::alert::{AlertSink, LogSink, WebhookSink};
use crate::config::Config;
use crate::database::DatabaseImpl;
use crate::engine::Engine;
use crate::monitoring::HttpProbe;
use crate::pool::{StoreManager, StorePool};
use crate::vuln::{HttpVulnSource, VulnSchedule, VulnSource};

/// Monitoring & vulnerability tracking engine.
#[derive(Debug, Parser)]
#[command(name = "vigil-service", version, about)]
struct Cli {
    /// Path to the TOML config file (default: $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the database path from the config file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Run an on-demand vulnerability scan of all targets at startup
    #[arg(long)]
    scan_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref()).context("failed to load config")?;
    let db_path = cli.db.unwrap_or_else(|| config.database.path.clone());

    info!("opening database at {}", db_path.display());
    let database_file = libsql::Builder::new_local(&db_path).build().await?;
    let pool: StorePool = deadpool::managed::Pool::builder(StoreManager::new(database_file))
        .build()
        .context("failed to build connection pool")?;

    {
        let conn = pool.get().await?;
        database::initialize_database(&conn).await?;
    }

    let database = Arc::new(DatabaseImpl::new(pool));

    let probe =
        Arc::new(HttpProbe::new(config.probe.timeout_ms, config.probe.body_capture_chars)?);

    let sink: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
        Some(url) => {
            info!("alerts will be delivered to {}", url);
            Arc::new(WebhookSink::new(url.clone())?)
        }
        None => Arc::new(LogSink),
    };

    let source: Option<Arc<dyn VulnSource>> = match &config.vuln.source_url {
        Some(url) => Some(Arc::new(HttpVulnSource::new(url, config.vuln.api_key.clone())?)),
        None => None,
    };

    let schedule = VulnSchedule {
        daily_hour: config.vuln.daily_hour.min(23),
        batch_delay: Duration::from_secs(config.vuln.batch_delay_seconds),
        on_demand_delay: Duration::from_secs(config.vuln.on_demand_delay_seconds),
        history_retention_days: config.vuln.history_retention_days,
    };

    let engine = Engine::new(database, probe, sink, source, schedule);
    engine.start().await?;

    if cli.scan_now {
        let scanned = engine.scan_all_now().await?;
        info!("on-demand scan finished, {} target(s)", scanned);
    }

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutting down");
    engine.shutdown().await;

    Ok(())
}
