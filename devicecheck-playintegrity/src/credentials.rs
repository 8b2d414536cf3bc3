//! Service-account authentication for the Play Integrity API.
//!
//! Implements the OAuth 2.0 JWT bearer grant: an RS256 assertion signed with
//! the service account key is exchanged for a short-lived access token, which
//! is cached until shortly before it expires.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// OAuth scope required by `decodeIntegrityToken`.
pub const PLAY_INTEGRITY_SCOPE: &str = "https://www.googleapis.com/auth/playintegrity";

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh cached tokens this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Invalid service account credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),
}

impl CredentialsError {
    /// Whether the configured credentials themselves are unusable.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CredentialsError::InvalidCredentials(_) | CredentialsError::InvalidKey(_)
        )
    }
}

/// Google service account key file (`type = "service_account"`).
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, CredentialsError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| CredentialsError::InvalidCredentials(e.to_string()))?;

        if let Some(key_type) = key.key_type.as_deref() {
            if key_type != "service_account" {
                return Err(CredentialsError::InvalidCredentials(format!(
                    "unsupported credentials type {}",
                    key_type
                )));
            }
        }
        Ok(key)
    }

    /// Signed JWT bearer assertion for the Play Integrity scope.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, CredentialsError> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: PLAY_INTEGRITY_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| CredentialsError::InvalidKey(e.to_string()))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| CredentialsError::InvalidKey(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// Access tokens for one service account, cached across requests.
pub struct TokenSource {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: Arc<RwLock<Option<AccessToken>>>,
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Return a valid bearer token, exchanging a fresh assertion if needed.
    pub async fn access_token(&self) -> Result<String, CredentialsError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!(client_email = %self.key.client_email, "Requesting access token");
        let token = self.exchange().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange(&self) -> Result<AccessToken, CredentialsError> {
        let now = Utc::now();
        let assertion = self.key.assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialsError::TokenEndpoint(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(AccessToken {
            value: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.key.client_email)
            .finish()
    }
}
