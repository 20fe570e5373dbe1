use crate::error::ForwarderError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Device keys, as reported by the sensor node's `/api` endpoint.
const SOIL_RAW_KEY: &str = "soil_raw";
const TEMPERATURE_KEY: &str = "temp_c";
const HUMIDITY_KEY: &str = "humidity";

/// The sensor values decoded from one poll response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSample {
    pub soil_raw: Option<Value>,
    pub temp_c: Option<Value>,
    pub humidity: Option<Value>,
}

impl DeviceSample {
    /// Extracts the known keys from a device response.
    ///
    /// Any subset of the keys may be missing, and `null` counts as missing.
    /// Present values are kept as sent, whatever their JSON type. The body
    /// itself must be an object.
    pub fn from_json(body: Value) -> Result<Self, ForwarderError> {
        let object = match body {
            Value::Object(object) => object,
            other => {
                return Err(ForwarderError::MalformedResponse(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let field = |key: &str| match object.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        };

        Ok(Self {
            soil_raw: field(SOIL_RAW_KEY),
            temp_c: field(TEMPERATURE_KEY),
            humidity: field(HUMIDITY_KEY),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One processed sample, written unchanged to the local log and the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// RFC 3339 UTC timestamp of local processing
    pub timestamp: String,
    pub device_id: String,
    pub soil_raw: Option<Value>,
    pub temperature_c: Option<Value>,
    pub humidity: Option<Value>,
}

impl Reading {
    pub fn new(sample: DeviceSample, device_id: &str, processed_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: processed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            device_id: device_id.to_string(),
            soil_raw: sample.soil_raw,
            temperature_c: sample.temp_c,
            humidity: sample.humidity,
        }
    }
}

/// Success and failure counts for a forwarder run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub forwarded: u64,
    pub transient_network: u64,
    pub malformed_response: u64,
    pub local_log: u64,
    pub sink_write: u64,
}

impl ForwarderStats {
    pub fn record_failure(&mut self, err: &ForwarderError) {
        match err {
            ForwarderError::TransientNetwork(_) => self.transient_network += 1,
            ForwarderError::MalformedResponse(_) => self.malformed_response += 1,
            ForwarderError::LocalLog(_) => self.local_log += 1,
            ForwarderError::SinkWrite(_) => self.sink_write += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.transient_network + self.malformed_response + self.local_log + self.sink_write
    }
}
