//! `decodeIntegrityToken` response payload.

use devicecheck_core::{AppRecognitionVerdict, DeviceRecognitionVerdict, RawVerdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Response body of `POST /v1/{packageName}:decodeIntegrityToken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeIntegrityTokenResponse {
    pub token_payload_external: TokenPayloadExternal,
}

/// Decrypted and verified integrity verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayloadExternal {
    #[serde(default)]
    pub request_details: RequestDetails,
    #[serde(default)]
    pub app_integrity: AppIntegrity,
    #[serde(default)]
    pub device_integrity: DeviceIntegrity,
    #[serde(default)]
    pub account_details: AccountDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_package_name: Option<String>,
    /// Nonce the client passed when requesting the token
    pub nonce: Option<String>,
    /// int64 serialized as a JSON string
    pub timestamp_millis: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIntegrity {
    pub app_recognition_verdict: Option<AppRecognitionVerdict>,
    pub package_name: Option<String>,
    #[serde(default)]
    pub certificate_sha256_digest: Vec<String>,
    pub version_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIntegrity {
    #[serde(default)]
    pub device_recognition_verdict: BTreeSet<DeviceRecognitionVerdict>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    /// LICENSED, UNLICENSED or UNEVALUATED
    pub app_licensing_verdict: Option<String>,
}

impl TokenPayloadExternal {
    /// Extract the fields policy evaluation needs.
    ///
    /// A missing nonce becomes an empty echo, which never matches an issued
    /// challenge.
    pub fn to_raw_verdict(&self) -> RawVerdict {
        RawVerdict::PlayIntegrity {
            nonce_echoed: self.request_details.nonce.clone().unwrap_or_default(),
            app_recognition: self
                .app_integrity
                .app_recognition_verdict
                .unwrap_or(AppRecognitionVerdict::Unevaluated),
            device_recognition: self.device_integrity.device_recognition_verdict.clone(),
        }
    }
}
