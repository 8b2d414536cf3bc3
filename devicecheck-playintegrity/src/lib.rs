//! Google Play Integrity verifier.
//!
//! The integrity token is opaque to the gate: it is forwarded to Google's
//! `decodeIntegrityToken` endpoint, and the decoded payload is reduced to a
//! raw verdict. Nonce binding and check-level grading happen in policy
//! evaluation, not here.

pub mod client;
pub mod credentials;
pub mod payload;

use async_trait::async_trait;
use client::{DecodeError, IntegrityTokenDecoder, PlayIntegrityClient};
use devicecheck_core::{
    AttestationError, AttestationVerifier, Evidence, RawVerdict, Scheme, VerificationConfig,
};

impl From<DecodeError> for AttestationError {
    fn from(e: DecodeError) -> Self {
        match &e {
            DecodeError::Credentials(inner) if inner.is_configuration() => {
                AttestationError::Configuration(e.to_string())
            }
            _ => AttestationError::Transport(e.to_string()),
        }
    }
}

/// Google Play Integrity verifier.
pub struct PlayIntegrityVerifier {
    decoder: Box<dyn IntegrityTokenDecoder>,
}

impl PlayIntegrityVerifier {
    /// Verifier backed by the Play Integrity API.
    pub fn new() -> Result<Self, AttestationError> {
        let client =
            PlayIntegrityClient::new().map_err(|e| AttestationError::Configuration(e.to_string()))?;
        Ok(Self::with_decoder(Box::new(client)))
    }

    pub fn with_decoder(decoder: Box<dyn IntegrityTokenDecoder>) -> Self {
        Self { decoder }
    }
}

impl std::fmt::Debug for PlayIntegrityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayIntegrityVerifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl AttestationVerifier for PlayIntegrityVerifier {
    fn scheme(&self) -> Scheme {
        Scheme::PlayIntegrity
    }

    async fn validate(
        &self,
        evidence: &Evidence,
        _challenge: &str,
        config: &VerificationConfig,
    ) -> Result<RawVerdict, AttestationError> {
        let token = match evidence {
            Evidence::PlayIntegrity { integrity_token } => integrity_token,
            other => {
                return Err(AttestationError::Configuration(format!(
                    "play-integrity verifier received {} evidence",
                    other.scheme()
                )))
            }
        };
        let config = match config {
            VerificationConfig::PlayIntegrity(config) => config,
            other => {
                return Err(AttestationError::Configuration(format!(
                    "play-integrity verifier received {} configuration",
                    other.scheme()
                )))
            }
        };

        tracing::info!(package_name = %config.package_name, "Decoding integrity token");
        let payload = self.decoder.decode(token, config).await?;

        tracing::info!(
            licensing_verdict = ?payload.account_details.app_licensing_verdict,
            app_recognition_verdict = ?payload.app_integrity.app_recognition_verdict,
            device_recognition_verdict = ?payload.device_integrity.device_recognition_verdict,
            nonce = ?payload.request_details.nonce,
            "Integrity token decoded"
        );

        if let Some(package) = payload.app_integrity.package_name.as_deref() {
            if package != config.package_name {
                tracing::warn!(
                    expected = %config.package_name,
                    actual = %package,
                    "Integrity verdict is for a different package"
                );
            }
        }

        Ok(payload.to_raw_verdict())
    }
}
