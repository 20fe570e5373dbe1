use crate::types::Reading;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const HEADER: [&str; 5] = ["timestamp", "device_id", "soil_raw", "temperature_c", "humidity"];

/// Append-only CSV log of readings.
///
/// The file is opened for every append; nothing is held open between calls.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file with its header row if it does not exist yet.
    /// An existing file is left untouched.
    pub async fn ensure_header(&self) -> io::Result<()> {
        if fs::try_exists(&self.path).await? {
            return Ok(());
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(e) => return Err(e),
        };
        file.write_all(format_row(&HEADER).as_bytes()).await?;
        file.flush().await
    }

    pub async fn append(&self, reading: &Reading) -> io::Result<()> {
        self.ensure_header().await?;

        let row = format_row(&[
            reading.timestamp.as_str(),
            reading.device_id.as_str(),
            optional(&reading.soil_raw).as_str(),
            optional(&reading.temperature_c).as_str(),
            optional(&reading.humidity).as_str(),
        ]);

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(row.as_bytes()).await?;
        file.flush().await
    }
}

fn optional(value: &Option<Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn format_row(fields: &[&str]) -> String {
    let mut row = fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
