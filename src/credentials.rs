//! Static credentials for the realtime database.
//!
//! Two credential files are understood:
//!
//! - a Google service account key (`"type": "service_account"`), which is
//!   traded for short-lived OAuth2 access tokens by signing an RS256 JWT
//!   assertion with the account's private key;
//! - a legacy database secret (`{"database_secret": "..."}`), sent as is.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use ring::rand::SystemRandom;
use ring::signature::{self, RsaKeyPair};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/firebase.database",
];
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are replaced before use.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read credential file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid credential file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported credential file: {0}")]
    Unsupported(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    token_uri: Option<String>,
    database_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    ServiceAccount {
        client_email: String,
        private_key_pem: String,
        token_uri: String,
    },
    DatabaseSecret(String),
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let content = fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CredentialError> {
        let file: CredentialFile = serde_json::from_str(content)?;

        if let Some(secret) = file.database_secret {
            return Ok(Credentials::DatabaseSecret(secret));
        }

        match file.kind.as_deref() {
            Some("service_account") => {
                let client_email = file.client_email.ok_or_else(|| {
                    CredentialError::Unsupported("service account without client_email".into())
                })?;
                let private_key_pem = file.private_key.ok_or_else(|| {
                    CredentialError::Unsupported("service account without private_key".into())
                })?;

                Ok(Credentials::ServiceAccount {
                    client_email,
                    private_key_pem,
                    token_uri: file.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                })
            }
            Some(other) => Err(CredentialError::Unsupported(format!(
                "credential type {:?}",
                other
            ))),
            None => Err(CredentialError::Unsupported(
                "neither a service account nor a database secret".into(),
            )),
        }
    }
}

/// Produces the query parameter that authorizes a database request.
pub enum Authenticator {
    DatabaseSecret(String),
    ServiceAccount {
        signer: ServiceAccountSigner,
        token: Option<AccessToken>,
    },
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Result<Self, CredentialError> {
        Ok(match credentials {
            Credentials::DatabaseSecret(secret) => Authenticator::DatabaseSecret(secret),
            Credentials::ServiceAccount {
                client_email,
                private_key_pem,
                token_uri,
            } => Authenticator::ServiceAccount {
                signer: ServiceAccountSigner::new(client_email, &private_key_pem, token_uri)?,
                token: None,
            },
        })
    }

    /// Returns `(name, value)` for the request's query string, exchanging a
    /// fresh access token first when none is cached or it is about to expire.
    pub async fn query_param(
        &mut self,
        client: &reqwest::Client,
    ) -> Result<(&'static str, String), CredentialError> {
        match self {
            Authenticator::DatabaseSecret(secret) => Ok(("auth", secret.clone())),
            Authenticator::ServiceAccount { signer, token } => {
                let now = Utc::now();
                let current = match token.take() {
                    Some(cached) if cached.is_fresh(now) => cached,
                    _ => {
                        let fresh = signer.fetch_token(client, now).await?;
                        info!(
                            "Obtained access token for {}, valid until {}",
                            signer.client_email, fresh.expires_at
                        );
                        fresh
                    }
                };
                let value = current.token.clone();
                *token = Some(current);
                Ok(("access_token", value))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

pub struct ServiceAccountSigner {
    client_email: String,
    token_uri: String,
    key_pair: RsaKeyPair,
    rng: SystemRandom,
}

impl ServiceAccountSigner {
    pub fn new(
        client_email: String,
        private_key_pem: &str,
        token_uri: String,
    ) -> Result<Self, CredentialError> {
        let der = pkcs8_der(private_key_pem)?;
        let key_pair = RsaKeyPair::from_pkcs8(&der)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;

        Ok(Self {
            client_email,
            token_uri,
            key_pair,
            rng: SystemRandom::new(),
        })
    }

    /// Builds a signed JWT bearer assertion issued at `now`.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let header = json!({"alg": "RS256", "typ": "JWT"});
        let claims = json!({
            "iss": self.client_email,
            "scope": SCOPES.join(" "),
            "aud": self.token_uri,
            "iat": now.timestamp(),
            "exp": now.timestamp() + ASSERTION_LIFETIME_SECS,
        });

        let signing_input = format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(header.to_string()),
            general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
        );

        let mut sig = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &signature::RSA_PKCS1_SHA256,
                &self.rng,
                signing_input.as_bytes(),
                &mut sig,
            )
            .map_err(|_| CredentialError::InvalidKey("RSA signing failed".into()))?;

        Ok(format!(
            "{}.{}",
            signing_input,
            general_purpose::URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, CredentialError> {
        let assertion = self.assertion(now)?;
        debug!("Requesting access token from {}", self.token_uri);

        let response = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenExchange(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::TokenExchange(e.to_string()))?;

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                CredentialError::TokenExchange(format!(
                    "token lifetime out of range: {}s",
                    token.expires_in
                ))
            })?;

        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }
}

/// Returns the DER bytes of the first PKCS#8 private key in `pem`.
fn pkcs8_der(pem: &str) -> Result<Vec<u8>, CredentialError> {
    let key = rustls_pemfile::pkcs8_private_keys(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| CredentialError::InvalidKey("no PKCS#8 private key in PEM".into()))?
        .map_err(|e| CredentialError::InvalidKey(format!("malformed PEM: {}", e)))?;

    Ok(key.secret_pkcs8_der().to_vec())
}
