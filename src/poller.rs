use crate::error::ForwarderError;
use crate::types::DeviceSample;
use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use std::time::Duration;

/// Source of device samples, one per call.
pub trait Poller {
    async fn poll(&self) -> Result<DeviceSample, ForwarderError>;
}

/// Polls the sensor node's JSON endpoint over HTTP.
pub struct HttpPoller {
    client: reqwest::Client,
    url: String,
}

impl HttpPoller {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build device HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Poller for HttpPoller {
    async fn poll(&self) -> Result<DeviceSample, ForwarderError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(network_error)?;

        let body = response.bytes().await.map_err(network_error)?;
        debug!("Device responded with {} bytes", body.len());

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ForwarderError::MalformedResponse(e.to_string()))?;

        DeviceSample::from_json(value)
    }
}

fn network_error(err: reqwest::Error) -> ForwarderError {
    let message = if err.is_timeout() {
        format!("timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else if let Some(status) = err.status() {
        format!("device returned status {}", status)
    } else {
        err.to_string()
    };

    ForwarderError::TransientNetwork(message)
}
