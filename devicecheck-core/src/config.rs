//! Per-deployment verification configuration.
//!
//! Configuration is supplied once by the host and is read-only while a
//! transaction is in flight.

use crate::types::Scheme;
use crate::verifier::AttestationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// App Attest trust environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppAttestEnvironment {
    /// Keys generated by development-signed builds (`appattestdevelop` AAGUID)
    #[default]
    Development,
    /// Keys generated by App Store / TestFlight builds
    Production,
}

impl fmt::Display for AppAttestEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppAttestEnvironment::Development => write!(f, "DEVELOPMENT"),
            AppAttestEnvironment::Production => write!(f, "PRODUCTION"),
        }
    }
}

/// Required Play Integrity check level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckLevel {
    /// Nonce binding alone is sufficient
    #[default]
    #[serde(alias = "NonceOnly")]
    NonceOnly,
    /// Nonce binding plus a Play-recognized app on a device meeting device integrity
    #[serde(alias = "NonceDeviceApp")]
    NonceDeviceApp,
}

impl fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckLevel::NonceOnly => write!(f, "NONCE_ONLY"),
            CheckLevel::NonceDeviceApp => write!(f, "NONCE_DEVICE_APP"),
        }
    }
}

/// Apple App Attest configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAttestConfig {
    /// The iOS app's bundle id
    pub bundle_id: String,
    /// The Apple developer team id
    pub team_id: String,
    #[serde(default)]
    pub environment: AppAttestEnvironment,
}

impl AppAttestConfig {
    /// App identifier as embedded (hashed) in the authenticator data.
    pub fn app_id(&self) -> String {
        format!("{}.{}", self.team_id, self.bundle_id)
    }
}

impl Default for AppAttestConfig {
    fn default() -> Self {
        Self {
            bundle_id: "hu.dpc.sample".to_string(),
            team_id: "123456789A".to_string(),
            environment: AppAttestEnvironment::Development,
        }
    }
}

/// Google Play Integrity configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayIntegrityConfig {
    /// The Android app's package name
    pub package_name: String,
    /// Application name reported to the Google API
    pub app_name: String,
    /// Google service account key (JSON document)
    #[serde(alias = "googleCredentials")]
    pub service_credentials_json: String,
    #[serde(default)]
    pub check_level: CheckLevel,
}

impl Default for PlayIntegrityConfig {
    fn default() -> Self {
        Self {
            package_name: "hu.dpc.sample".to_string(),
            app_name: "hu.dpc.sample".to_string(),
            service_credentials_json: String::new(),
            check_level: CheckLevel::NonceOnly,
        }
    }
}

impl fmt::Debug for PlayIntegrityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayIntegrityConfig")
            .field("package_name", &self.package_name)
            .field("app_name", &self.app_name)
            .field("service_credentials_json", &"<redacted>")
            .field("check_level", &self.check_level)
            .finish()
    }
}

/// Scheme-tagged verification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "kebab-case")]
pub enum VerificationConfig {
    AppAttest(AppAttestConfig),
    PlayIntegrity(PlayIntegrityConfig),
}

impl VerificationConfig {
    pub fn scheme(&self) -> Scheme {
        match self {
            VerificationConfig::AppAttest(_) => Scheme::AppAttest,
            VerificationConfig::PlayIntegrity(_) => Scheme::PlayIntegrity,
        }
    }

    /// Parse host-supplied configuration.
    ///
    /// Unknown schemes, environments or check levels are configuration errors.
    pub fn from_json(json: &str) -> Result<Self, AttestationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AttestationError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations with empty required attributes.
    pub fn validate(&self) -> Result<(), AttestationError> {
        match self {
            VerificationConfig::AppAttest(cfg) => {
                require("bundleId", &cfg.bundle_id)?;
                require("teamId", &cfg.team_id)?;
            }
            VerificationConfig::PlayIntegrity(cfg) => {
                require("packageName", &cfg.package_name)?;
                require("appName", &cfg.app_name)?;
                require("serviceCredentialsJson", &cfg.service_credentials_json)?;
            }
        }
        Ok(())
    }
}

fn require(name: &str, value: &str) -> Result<(), AttestationError> {
    if value.trim().is_empty() {
        return Err(AttestationError::Configuration(format!(
            "required attribute {} is empty",
            name
        )));
    }
    Ok(())
}

/// Settings of the protocol state machine itself.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Maximum age of an issued challenge
    pub challenge_ttl: Duration,
    /// Upper bound on a single `validate` call
    pub verification_timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            challenge_ttl: Duration::from_secs(300), // 5 minutes
            verification_timeout: Duration::from_secs(30),
        }
    }
}
