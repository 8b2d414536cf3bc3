//! Play Integrity API client.
//!
//! Calls `decodeIntegrityToken` on behalf of the configured service account.

use crate::credentials::{CredentialsError, ServiceAccountKey, TokenSource};
use crate::payload::{DecodeIntegrityTokenResponse, TokenPayloadExternal};
use async_trait::async_trait;
use devicecheck_core::PlayIntegrityConfig;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_BASE_URL: &str = "https://playintegrity.googleapis.com";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Play Integrity API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

/// Turns an opaque integrity token into its verified payload.
#[async_trait]
pub trait IntegrityTokenDecoder: Send + Sync {
    async fn decode(
        &self,
        integrity_token: &str,
        config: &PlayIntegrityConfig,
    ) -> Result<TokenPayloadExternal, DecodeError>;
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-request timeout, covering the token exchange and the decode call
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecodeIntegrityTokenRequest<'a> {
    integrity_token: &'a str,
}

/// reqwest-backed `decodeIntegrityToken` client.
pub struct PlayIntegrityClient {
    http: Client,
    config: ClientConfig,
    /// Token sources keyed by the credentials JSON they were built from
    token_sources: Arc<RwLock<HashMap<String, Arc<TokenSource>>>>,
}

impl PlayIntegrityClient {
    pub fn new() -> Result<Self, DecodeError> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, DecodeError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            config,
            token_sources: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn decode_url(&self, package_name: &str) -> String {
        format!(
            "{}/v1/{}:decodeIntegrityToken",
            self.config.base_url.trim_end_matches('/'),
            package_name
        )
    }

    async fn token_source(&self, credentials_json: &str) -> Result<Arc<TokenSource>, DecodeError> {
        if let Some(source) = self.token_sources.read().await.get(credentials_json) {
            return Ok(source.clone());
        }

        let key = ServiceAccountKey::from_json(credentials_json)?;
        let mut sources = self.token_sources.write().await;
        let source = sources
            .entry(credentials_json.to_string())
            .or_insert_with(|| Arc::new(TokenSource::new(key, self.http.clone())));
        Ok(source.clone())
    }
}

impl std::fmt::Debug for PlayIntegrityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayIntegrityClient")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl IntegrityTokenDecoder for PlayIntegrityClient {
    async fn decode(
        &self,
        integrity_token: &str,
        config: &PlayIntegrityConfig,
    ) -> Result<TokenPayloadExternal, DecodeError> {
        let source = self.token_source(&config.service_credentials_json).await?;
        let access_token = source.access_token().await?;

        let response = self
            .http
            .post(self.decode_url(&config.package_name))
            .header(reqwest::header::USER_AGENT, config.app_name.as_str())
            .bearer_auth(access_token)
            .json(&DecodeIntegrityTokenRequest { integrity_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(DecodeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: DecodeIntegrityTokenResponse = response.json().await?;
        Ok(body.token_payload_external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::credentials_json;

    #[test]
    fn test_decode_url() {
        let client = PlayIntegrityClient::with_config(ClientConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.decode_url("hu.dpc.sample"),
            "http://localhost:8080/v1/hu.dpc.sample:decodeIntegrityToken"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(DecodeIntegrityTokenRequest {
            integrity_token: "abc",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "integrityToken": "abc" }));
    }

    #[tokio::test]
    async fn test_token_sources_are_shared_per_credentials() {
        let client = PlayIntegrityClient::new().unwrap();
        let json = credentials_json();

        let first = client.token_source(&json).await.unwrap();
        let second = client.token_source(&json).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.client_email(),
            "gate@devicecheck-sample.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn test_invalid_credentials_fail_before_network() {
        let client = PlayIntegrityClient::new().unwrap();
        let config = PlayIntegrityConfig {
            service_credentials_json: "not json".to_string(),
            ..PlayIntegrityConfig::default()
        };

        let err = client.decode("token", &config).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Credentials(CredentialsError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = PlayIntegrityClient::with_config(ClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();

        let mut json: serde_json::Value = serde_json::from_str(&credentials_json()).unwrap();
        json["token_uri"] = serde_json::Value::String("http://127.0.0.1:9/token".to_string());
        let config = PlayIntegrityConfig {
            service_credentials_json: json.to_string(),
            ..PlayIntegrityConfig::default()
        };

        let err = client.decode("token", &config).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Credentials(CredentialsError::Network(_))
        ));
    }
}
