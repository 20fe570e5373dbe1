mod config;
mod credentials;
mod csv_log;
mod error;
mod forwarder;
mod poller;
mod sink;
mod types;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use simple_logger::SimpleLogger;
use tokio::sync::watch;

use crate::credentials::Credentials;
use crate::csv_log::CsvLog;
use crate::forwarder::Forwarder;
use crate::poller::HttpPoller;
use crate::sink::FirebaseSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = config::Cli::parse();

    let level: log::LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", cli.log_level))?;
    SimpleLogger::new().with_level(level).env().init()?;

    info!("Starting soil-forwarder");

    // Load configuration
    let config = config::load_config(&cli)?;
    info!("Configuration loaded successfully");

    // Without the sink there is nothing useful to do, so these errors end the process
    let credentials = Credentials::load(&config.credentials_path)
        .context("Failed to load database credentials")?;
    let sink = FirebaseSink::connect(
        &config.database_url,
        &config.collection,
        credentials,
        config.sink_timeout(),
    )
    .await?;
    info!("Realtime database connected, starting loop");

    let poller = HttpPoller::new(&config.device_url, config.poll_timeout())?;
    let forwarder = Forwarder::new(
        poller,
        CsvLog::new(&config.csv_path),
        sink,
        config.device_id.clone(),
        config::POLL_INTERVAL,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current iteration");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                // Keep the sender alive so the loop keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    let stats = forwarder.run(shutdown_rx).await;
    info!("Final stats: {:?}", stats);

    Ok(())
}
