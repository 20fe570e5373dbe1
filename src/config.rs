use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1/api";
pub const DEFAULT_CSV_PATH: &str = "tmf_readings.csv";
pub const DEFAULT_DEVICE_ID: &str = "tmf_bed_1";
pub const DEFAULT_CREDENTIALS_PATH: &str = "service-account.json";
pub const DEFAULT_DATABASE_URL: &str = "https://tmf-epics-default-rtdb.firebaseio.com";
pub const DEFAULT_COLLECTION: &str = "/tmf/readings";

/// Sleep between two iterations. Not configurable.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[clap(name = "soil-forwarder", version, about)]
pub struct Cli {
    /// Path to configuration file
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override sensor node endpoint URL
    #[clap(long)]
    pub device_url: Option<String>,

    /// Override local CSV log path
    #[clap(long)]
    pub csv_path: Option<PathBuf>,

    /// Override device ID written into every reading
    #[clap(long)]
    pub device_id: Option<String>,

    /// Override credential file path
    #[clap(long)]
    pub credentials: Option<PathBuf>,

    /// Override realtime database URL
    #[clap(long)]
    pub database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_url: String,
    pub csv_path: PathBuf,
    pub device_id: String,
    pub credentials_path: PathBuf,
    pub database_url: String,
    pub collection: String,
    pub poll_timeout_secs: u64,
    pub sink_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_url: DEFAULT_DEVICE_URL.to_string(),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            poll_timeout_secs: 2,
            sink_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() || cli.config.as_path() != Path::new(DEFAULT_CONFIG_PATH) {
        let config_content = fs::read_to_string(&cli.config)
            .with_context(|| format!("Failed to read config file: {:?}", cli.config))?;

        toml::from_str(&config_content).context("Failed to parse config file")?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(ref device_url) = cli.device_url {
        config.device_url = device_url.clone();
    }

    if let Some(ref csv_path) = cli.csv_path {
        config.csv_path = csv_path.clone();
    }

    if let Some(ref device_id) = cli.device_id {
        config.device_id = device_id.clone();
    }

    if let Some(ref credentials) = cli.credentials {
        config.credentials_path = credentials.clone();
    }

    if let Some(ref database_url) = cli.database_url {
        config.database_url = database_url.clone();
    }

    Ok(config)
}
