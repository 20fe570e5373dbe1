use crate::credentials::{Authenticator, Credentials};
use crate::error::ForwarderError;
use crate::types::Reading;
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Destination for readings. Returns the key the sink assigned.
pub trait Sink {
    async fn push(&mut self, reading: &Reading) -> Result<String, ForwarderError>;
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// Appends readings under a collection of a Firebase Realtime Database via
/// its REST interface. Each push creates a child with a generated key.
pub struct FirebaseSink {
    client: reqwest::Client,
    endpoint: Url,
    auth: Authenticator,
}

impl FirebaseSink {
    /// Validates the target and authenticates once. Any failure here means
    /// nothing can be forwarded, so callers should treat it as fatal.
    pub async fn connect(
        database_url: &str,
        collection: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = collection_url(database_url, collection)?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build database HTTP client")?;

        let mut auth = Authenticator::new(credentials).context("Failed to load credentials")?;
        auth.query_param(&client)
            .await
            .context("Failed to authenticate with the realtime database")?;

        info!("Realtime database sink ready at {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            auth,
        })
    }
}

impl Sink for FirebaseSink {
    async fn push(&mut self, reading: &Reading) -> Result<String, ForwarderError> {
        let (param, value) = self
            .auth
            .query_param(&self.client)
            .await
            .map_err(|e| ForwarderError::SinkWrite(e.to_string()))?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[(param, value.as_str())])
            .json(reading)
            .send()
            .await
            .map_err(|e| ForwarderError::SinkWrite(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwarderError::SinkWrite(format!(
                "database returned {}: {}",
                status,
                body.trim()
            )));
        }

        let pushed: PushResponse = response
            .json()
            .await
            .map_err(|e| ForwarderError::SinkWrite(format!("unexpected push response: {}", e)))?;

        debug!("Pushed reading as {}", pushed.name);
        Ok(pushed.name)
    }
}

/// `https://db.example.com` + `/tmf/readings` → `https://db.example.com/tmf/readings.json`
fn collection_url(database_url: &str, collection: &str) -> Result<Url> {
    let mut url = Url::parse(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        anyhow::bail!("Unsupported database URL scheme: {}", url.scheme());
    }

    let collection = collection.trim_matches('/');
    if collection.is_empty() {
        anyhow::bail!("Collection path must not be empty");
    }

    let path = format!("{}/{}.json", url.path().trim_end_matches('/'), collection);
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use crate::types::DeviceSample;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;

    type Stored = Arc<Mutex<Vec<Value>>>;

    async fn push_handler(
        State(stored): State<Stored>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if query.get("auth").map(String::as_str) != Some("s3cret") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Permission denied"})),
            );
        }
        let mut stored = stored.lock().unwrap();
        stored.push(body);
        (StatusCode::OK, Json(json!({"name": format!("-Nkey{}", stored.len())})))
    }

    async fn spawn_database() -> (SocketAddr, Stored, JoinHandle<()>) {
        let stored: Stored = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route("/tmf/readings.json", post(push_handler))
            .with_state(Arc::clone(&stored));
        let (addr, handle) = spawn_server(router).await;
        (addr, stored, handle)
    }

    async fn connect(addr: SocketAddr, secret: &str) -> FirebaseSink {
        FirebaseSink::connect(
            &format!("http://{addr}"),
            "/tmf/readings",
            Credentials::DatabaseSecret(secret.into()),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    fn reading(body: Value) -> Reading {
        Reading::new(DeviceSample::from_json(body).unwrap(), "tmf_bed_1", Utc::now())
    }

    #[test]
    fn builds_collection_urls() {
        let url = collection_url("https://tmf-epics-default-rtdb.firebaseio.com", "/tmf/readings")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://tmf-epics-default-rtdb.firebaseio.com/tmf/readings.json"
        );

        let url = collection_url("http://localhost:9000/ns/", "readings/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/ns/readings.json");

        assert!(collection_url("not a url", "/tmf/readings").is_err());
        assert!(collection_url("ftp://example.com", "/tmf/readings").is_err());
        assert!(collection_url("https://example.com", "/").is_err());
    }

    #[tokio::test]
    async fn push_appends_reading_with_all_fields() {
        let (addr, stored, handle) = spawn_database().await;
        let mut sink = connect(addr, "s3cret").await;

        let first = reading(json!({"soil_raw": 512, "temp_c": 21.5, "humidity": 47.2}));
        let second = reading(json!({"soil_raw": 300}));
        let key1 = sink.push(&first).await.unwrap();
        let key2 = sink.push(&second).await.unwrap();
        handle.abort();

        assert_eq!(key1, "-Nkey1");
        assert_eq!(key2, "-Nkey2");

        let stored = stored.lock().unwrap();
        assert_eq!(stored[0], serde_json::to_value(&first).unwrap());
        assert_eq!(stored[0]["soil_raw"], json!(512));
        assert_eq!(stored[0]["temperature_c"], json!(21.5));
        assert_eq!(stored[1]["device_id"], json!("tmf_bed_1"));
        assert_eq!(stored[1]["temperature_c"], Value::Null);
        assert_eq!(stored[1]["humidity"], Value::Null);
        assert_eq!(stored[1].as_object().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn rejected_push_is_a_sink_write_error() {
        let (addr, stored, handle) = spawn_database().await;
        let mut sink = connect(addr, "wrong").await;

        let err = sink.push(&reading(json!({"soil_raw": 1}))).await.unwrap_err();
        handle.abort();

        assert!(matches!(err, ForwarderError::SinkWrite(_)));
        assert!(err.to_string().contains("401"), "{err}");
        assert!(stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_database_is_a_sink_write_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut sink = connect(addr, "s3cret").await;

        let err = sink.push(&reading(json!({}))).await.unwrap_err();
        assert!(matches!(err, ForwarderError::SinkWrite(_)));
    }

    #[tokio::test]
    async fn failed_service_account_login_is_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = FirebaseSink::connect(
            "https://tmf-epics-default-rtdb.firebaseio.com",
            "/tmf/readings",
            Credentials::ServiceAccount {
                client_email: "forwarder@tmf-epics.iam.gserviceaccount.com".into(),
                private_key_pem: crate::credentials::tests::TEST_KEY_PEM.into(),
                token_uri: format!("http://{addr}/token"),
            },
            Duration::from_secs(5),
        )
        .await;

        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("Failed to authenticate"));
    }

    #[tokio::test]
    async fn invalid_database_url_is_fatal() {
        let result = FirebaseSink::connect(
            "tmf-epics",
            "/tmf/readings",
            Credentials::DatabaseSecret("s3cret".into()),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_err());
    }
}
