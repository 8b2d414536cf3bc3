//! Apple App Attest verifier.
//!
//! Validates the attestation object a device produces for a freshly generated
//! App Attest key against the challenge issued for the current transaction.
//!
//! ## Verification Flow
//! 1. Decode the CBOR attestation object (`fmt = "apple-appattest"`)
//! 2. Verify the x5c chain up to the Apple App Attestation Root CA
//! 3. Check the leaf nonce extension equals SHA-256(authData || SHA-256(challenge))
//! 4. Check the key identifier is SHA-256 of the attested public key
//! 5. Check rpIdHash, counter, AAGUID and credential id in authenticator data

pub mod attestation;
pub mod chain;

use async_trait::async_trait;
use attestation::{AttestationObject, AttestationObjectError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chain::{ChainError, TrustAnchor};
use chrono::{DateTime, Utc};
use devicecheck_core::{
    AppAttestConfig, AppAttestEnvironment, AttestationError, AttestationVerifier, Evidence,
    RawVerdict, Scheme, VerificationConfig,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Apple App Attestation Root CA (PEM)
pub const APPLE_APP_ATTESTATION_ROOT_CA: &str = "-----BEGIN CERTIFICATE-----
MIICITCCAaegAwIBAgIQC/O+DvHN0uD7jG5yH2IXmDAKBggqhkjOPQQDAzBSMSYw
JAYDVQQDDB1BcHBsZSBBcHAgQXR0ZXN0YXRpb24gUm9vdCBDQTETMBEGA1UECgwK
QXBwbGUgSW5jLjETMBEGA1UECAwKQ2FsaWZvcm5pYTAeFw0yMDAzMTgxODMyNTNa
Fw00NTAzMTUwMDAwMDBaMFIxJjAkBgNVBAMMHUFwcGxlIEFwcCBBdHRlc3RhdGlv
biBSb290IENBMRMwEQYDVQQKDApBcHBsZSBJbmMuMRMwEQYDVQQIDApDYWxpZm9y
bmlhMHYwEAYHKoZIzj0CAQYFK4EEACIDYgAERTHhmLW07ATaFQIEVwTtT4dyctdh
NbJhFs/Ii2FdCgAHGbpphY3+d8qjuDngIN3WVhQUBHAoMeQ/cLiP1sOUtgjqK9au
Yen1mMEvRq9Sk3Jm5X8U62H+xTD3FE9TgS41o0IwQDAPBgNVHRMBAf8EBTADAQH/
MB0GA1UdDgQWBBSskRBTM72+aEH/pwyp5frq5eWKoTAOBgNVHQ8BAf8EBAMCAQYw
CgYIKoZIzj0EAwMDaAAwZQIwQgFGnByvsiVbpTKwSga0kP0e8EeDS4+sQmTvb7vn
53O5+FRXgeLhpJ06ysC5PrOyAjEAp5U4xDgEgllF7En3VcE3iexZZtKeYnpqtijV
oyFraWVIyd/dganmrduC1bmTBGwD
-----END CERTIFICATE-----";

const AAGUID_DEVELOPMENT: &[u8; 16] = b"appattestdevelop";
const AAGUID_PRODUCTION: &[u8; 16] = b"appattest\0\0\0\0\0\0\0";

#[derive(Debug, Error)]
pub enum AppAttestError {
    #[error("Invalid attestation object: {0}")]
    Object(#[from] AttestationObjectError),

    #[error("Certificate chain rejected: {0}")]
    Chain(#[from] ChainError),

    #[error("Key identifier is not base64: {0}")]
    KeyIdEncoding(String),

    #[error("Nonce mismatch: attestation is not bound to this challenge")]
    NonceMismatch,

    #[error("Key identifier does not match attested public key")]
    KeyIdMismatch,

    #[error("App id mismatch")]
    AppIdMismatch,

    #[error("Invalid signature counter: must be 0 but was {0}")]
    CounterNotZero(u32),

    #[error("AAGUID does not match {0} environment")]
    EnvironmentMismatch(AppAttestEnvironment),

    #[error("Credential id mismatch")]
    CredentialIdMismatch,
}

impl From<AppAttestError> for AttestationError {
    fn from(e: AppAttestError) -> Self {
        match e {
            AppAttestError::Object(AttestationObjectError::Decode(_))
            | AppAttestError::Object(AttestationObjectError::UnsupportedFormat(_))
            | AppAttestError::Object(AttestationObjectError::InvalidLength { .. })
            | AppAttestError::KeyIdEncoding(_) => AttestationError::MalformedEvidence(e.to_string()),
            AppAttestError::Chain(ChainError::InvalidTrustAnchor(_)) => {
                AttestationError::Configuration(e.to_string())
            }
            _ => AttestationError::Validation(e.to_string()),
        }
    }
}

/// Apple App Attest verifier.
#[derive(Debug, Clone)]
pub struct AppAttestVerifier {
    trust_anchor_pem: String,
    /// Fixed instant for certificate validity checks; `None` means now
    verification_time: Option<DateTime<Utc>>,
}

impl AppAttestVerifier {
    /// Create a verifier anchored at the Apple App Attestation Root CA.
    pub fn new() -> Self {
        Self {
            trust_anchor_pem: APPLE_APP_ATTESTATION_ROOT_CA.to_string(),
            verification_time: None,
        }
    }

    /// Replace the trust anchor. Used for private test roots.
    pub fn with_trust_anchor_pem(mut self, pem: impl Into<String>) -> Self {
        self.trust_anchor_pem = pem.into();
        self
    }

    /// Check certificate validity at a fixed instant instead of now.
    pub fn with_verification_time(mut self, at: DateTime<Utc>) -> Self {
        self.verification_time = Some(at);
        self
    }

    /// Run every App Attest check over one attestation.
    pub fn verify(
        &self,
        key_id: &str,
        attestation_object: &[u8],
        challenge: &str,
        config: &AppAttestConfig,
    ) -> Result<(), AppAttestError> {
        let object = AttestationObject::from_cbor(attestation_object)?;
        let auth_data = object.authenticator_data()?;

        let anchor = TrustAnchor::from_pem(&self.trust_anchor_pem)?;
        let at = self.verification_time.unwrap_or_else(Utc::now);
        let credential = chain::verify_chain(&object.att_stmt.x5c, &anchor, at)?;

        let client_data_hash = Sha256::digest(challenge.as_bytes());
        let nonce = Sha256::new()
            .chain_update(&object.auth_data)
            .chain_update(client_data_hash)
            .finalize();
        if credential.nonce.as_slice() != nonce.as_slice() {
            return Err(AppAttestError::NonceMismatch);
        }

        let expected_key_id = STANDARD
            .decode(key_id)
            .map_err(|e| AppAttestError::KeyIdEncoding(e.to_string()))?;
        let public_key_hash = Sha256::digest(&credential.public_key);
        if expected_key_id.as_slice() != public_key_hash.as_slice() {
            return Err(AppAttestError::KeyIdMismatch);
        }

        if auth_data.rp_id_hash[..] != Sha256::digest(config.app_id().as_bytes())[..] {
            return Err(AppAttestError::AppIdMismatch);
        }

        if auth_data.counter != 0 {
            return Err(AppAttestError::CounterNotZero(auth_data.counter));
        }

        let expected_aaguid = match config.environment {
            AppAttestEnvironment::Development => AAGUID_DEVELOPMENT,
            AppAttestEnvironment::Production => AAGUID_PRODUCTION,
        };
        if &auth_data.aaguid != expected_aaguid {
            return Err(AppAttestError::EnvironmentMismatch(config.environment));
        }

        if auth_data.credential_id.as_slice() != public_key_hash.as_slice() {
            return Err(AppAttestError::CredentialIdMismatch);
        }

        tracing::debug!(
            common_name = ?credential.common_name,
            environment = %config.environment,
            "Attestation statement checks passed"
        );
        Ok(())
    }
}

impl Default for AppAttestVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttestationVerifier for AppAttestVerifier {
    fn scheme(&self) -> Scheme {
        Scheme::AppAttest
    }

    async fn validate(
        &self,
        evidence: &Evidence,
        challenge: &str,
        config: &VerificationConfig,
    ) -> Result<RawVerdict, AttestationError> {
        let (key_id, attestation_object) = match evidence {
            Evidence::AppAttest {
                key_id,
                attestation_object,
            } => (key_id, attestation_object),
            other => {
                return Err(AttestationError::Configuration(format!(
                    "app-attest verifier received {} evidence",
                    other.scheme()
                )))
            }
        };
        let config = match config {
            VerificationConfig::AppAttest(config) => config,
            other => {
                return Err(AttestationError::Configuration(format!(
                    "app-attest verifier received {} configuration",
                    other.scheme()
                )))
            }
        };

        tracing::info!(
            app_id = %config.app_id(),
            key_id = %key_id,
            "Validating App Attest attestation"
        );

        self.verify(key_id, attestation_object, challenge, config)?;
        Ok(RawVerdict::AppAttest { attested: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devicecheck_core::{
        slots, AttestationGate, Decision, FaultKind, MemorySession, Outcome, Phase, SessionState,
        SubmittedSlots, Transaction, VerifierRegistry,
    };
    use proptest::prelude::*;

    /// Attestation from a development build of `AGG3V6QN4G.ch.procivis.one.wallet.dev`
    /// over the challenge `test`.
    const ATTESTATION_B64: &str = include_str!("../testdata/app_attestation.b64");
    const KEY_ID: &str = "GdT49HTvV0r+f3XH5W4/TuQ//RSeBuPMAVAXBnIn0fg=";

    fn attestation() -> Vec<u8> {
        STANDARD.decode(ATTESTATION_B64.trim()).unwrap()
    }

    fn verifier() -> AppAttestVerifier {
        AppAttestVerifier::new()
            .with_verification_time(Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap())
    }

    fn config() -> AppAttestConfig {
        AppAttestConfig {
            bundle_id: "ch.procivis.one.wallet.dev".to_string(),
            team_id: "AGG3V6QN4G".to_string(),
            environment: AppAttestEnvironment::Development,
        }
    }

    fn evidence(key_id: &str) -> Evidence {
        Evidence::AppAttest {
            key_id: key_id.to_string(),
            attestation_object: attestation(),
        }
    }

    async fn validate(
        verifier: &AppAttestVerifier,
        evidence: &Evidence,
        challenge: &str,
        config: AppAttestConfig,
    ) -> Result<RawVerdict, AttestationError> {
        verifier
            .validate(evidence, challenge, &VerificationConfig::AppAttest(config))
            .await
    }

    #[test]
    fn test_parse_real_attestation() {
        let object = AttestationObject::from_cbor(&attestation()).unwrap();
        assert_eq!(object.att_stmt.x5c.len(), 2);
        assert_eq!(object.auth_data.len(), 164);

        let auth_data = object.authenticator_data().unwrap();
        assert_eq!(&auth_data.aaguid, AAGUID_DEVELOPMENT);
        assert_eq!(
            hex::encode(&auth_data.credential_id),
            "19d4f8f474ef574afe7f75c7e56e3f4ee43ffd149e06e3cc015017067227d1f8"
        );
    }

    #[test]
    fn test_chain_exposes_nonce_and_common_name() {
        let object = AttestationObject::from_cbor(&attestation()).unwrap();
        let anchor = TrustAnchor::from_pem(APPLE_APP_ATTESTATION_ROOT_CA).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap();
        let credential = chain::verify_chain(&object.att_stmt.x5c, &anchor, at).unwrap();

        assert_eq!(
            hex::encode(&credential.nonce),
            "66d03998c720e20056bd5d42f3e0c8bd69f286a3a115bc3150c3b00714e2ac44"
        );
        assert_eq!(
            credential.common_name.as_deref(),
            Some("19d4f8f474ef574afe7f75c7e56e3f4ee43ffd149e06e3cc015017067227d1f8")
        );
    }

    #[tokio::test]
    async fn test_valid_attestation() {
        let verdict = validate(&verifier(), &evidence(KEY_ID), "test", config())
            .await
            .unwrap();
        assert_eq!(verdict, RawVerdict::AppAttest { attested: true });
    }

    #[tokio::test]
    async fn test_other_challenge_is_rejected() {
        let err = validate(&verifier(), &evidence(KEY_ID), "c2", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Validation);
        assert!(matches!(
            verifier().verify(KEY_ID, &attestation(), "c2", &config()),
            Err(AppAttestError::NonceMismatch)
        ));
    }

    #[tokio::test]
    async fn test_other_key_id_is_rejected() {
        let other = STANDARD.encode([0x11u8; 32]);
        let err = validate(&verifier(), &evidence(&other), "test", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Validation);
    }

    #[tokio::test]
    async fn test_key_id_not_base64_is_malformed() {
        let err = validate(&verifier(), &evidence("k1!"), "test", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::MalformedEvidence);
    }

    #[test]
    fn test_other_bundle_is_rejected() {
        let config = AppAttestConfig {
            bundle_id: "hu.dpc.sample".to_string(),
            ..config()
        };
        assert!(matches!(
            verifier().verify(KEY_ID, &attestation(), "test", &config),
            Err(AppAttestError::AppIdMismatch)
        ));
    }

    #[test]
    fn test_development_key_rejected_in_production() {
        let config = AppAttestConfig {
            environment: AppAttestEnvironment::Production,
            ..config()
        };
        assert!(matches!(
            verifier().verify(KEY_ID, &attestation(), "test", &config),
            Err(AppAttestError::EnvironmentMismatch(
                AppAttestEnvironment::Production
            ))
        ));
    }

    #[test]
    fn test_expired_leaf_is_rejected() {
        let verifier = AppAttestVerifier::new()
            .with_verification_time(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
        assert!(matches!(
            verifier.verify(KEY_ID, &attestation(), "test", &config()),
            Err(AppAttestError::Chain(ChainError::Expired(0)))
        ));
    }

    #[tokio::test]
    async fn test_truncated_object_is_malformed() {
        let mut bytes = attestation();
        bytes.truncate(100);
        let evidence = Evidence::AppAttest {
            key_id: KEY_ID.to_string(),
            attestation_object: bytes,
        };
        let err = validate(&verifier(), &evidence, "test", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::MalformedEvidence);
    }

    #[tokio::test]
    async fn test_untrusted_root_is_rejected() {
        // The intermediate is a valid CA, but not the one that signed it.
        let object = AttestationObject::from_cbor(&attestation()).unwrap();
        let anchor = TrustAnchor::from_der(object.att_stmt.x5c[1].clone()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap();
        assert!(matches!(
            chain::verify_chain(&object.att_stmt.x5c, &anchor, at),
            Err(ChainError::InvalidSignature { index: 1, .. })
        ));
    }

    #[test]
    fn test_non_ca_issuer_is_rejected() {
        // The leaf standing in as its own issuer carries CA:FALSE.
        let object = AttestationObject::from_cbor(&attestation()).unwrap();
        let leaf = object.att_stmt.x5c[0].clone();
        let anchor = TrustAnchor::from_pem(APPLE_APP_ATTESTATION_ROOT_CA).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap();

        let err = chain::verify_chain(&[leaf.clone(), leaf], &anchor, at).unwrap_err();
        assert!(matches!(err, ChainError::NotCa(0)));
        assert_eq!(
            AttestationError::from(AppAttestError::Chain(err)).kind(),
            FaultKind::Validation
        );
    }

    proptest! {
        #[test]
        fn prop_attestation_is_bound_to_its_challenge(challenge in "\\PC{0,64}") {
            prop_assume!(challenge != "test");
            let verdict = verifier().verify(KEY_ID, &attestation(), &challenge, &config());
            prop_assert!(matches!(verdict, Err(AppAttestError::NonceMismatch)));

            let err = AttestationError::from(verdict.unwrap_err());
            prop_assert_eq!(err.kind(), FaultKind::Validation);
        }
    }

    /// Session holding a pending App Attest transaction for `challenge`.
    fn session_with_challenge(challenge: &str) -> MemorySession {
        let transaction = Transaction {
            id: challenge.to_string(),
            created_at: Utc::now(),
            consumed: false,
        };
        let mut session = MemorySession::new();
        session.put(
            Scheme::AppAttest.session_key(),
            serde_json::to_string(&transaction).unwrap(),
        );
        session
    }

    async fn resume_gate(session: &mut MemorySession) -> Outcome {
        let gate = AttestationGate::new(VerifierRegistry::new().with(Box::new(verifier())));
        let submitted = SubmittedSlots::new()
            .with(slots::KEY_ID, KEY_ID)
            .with(slots::ATTESTATION, ATTESTATION_B64.trim());
        gate.evaluate(
            Phase::Resume(&submitted),
            session,
            &VerificationConfig::AppAttest(config()),
        )
        .await
    }

    #[tokio::test]
    async fn test_gate_allows_attestation_for_issued_challenge() {
        let mut session = session_with_challenge("test");
        let outcome = resume_gate(&mut session).await;

        assert_eq!(outcome, Outcome::Decided(Decision::allow()));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_gate_denies_attestation_for_other_challenge() {
        for challenge in ["c2", "TEST"] {
            let mut session = session_with_challenge(challenge);
            let outcome = resume_gate(&mut session).await;

            assert_eq!(
                outcome,
                Outcome::Decided(Decision::deny_with(FaultKind::Validation))
            );
            assert!(session.is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_trust_anchor_is_configuration_error() {
        let verifier = verifier().with_trust_anchor_pem("garbage");
        let err = validate(&verifier, &evidence(KEY_ID), "test", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Configuration);
    }

    #[tokio::test]
    async fn test_play_integrity_evidence_is_configuration_error() {
        let evidence = Evidence::PlayIntegrity {
            integrity_token: "token".to_string(),
        };
        let err = validate(&verifier(), &evidence, "test", config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Configuration);
    }
}
