//! Core types used across the device attestation gate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Attestation scheme a transaction is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// Apple App Attest (iOS)
    AppAttest,
    /// Google Play Integrity (Android)
    PlayIntegrity,
}

impl Scheme {
    /// Session key under which the scheme's pending transaction is stored.
    pub fn session_key(&self) -> &'static str {
        match self {
            Scheme::AppAttest => "devicecheck.appattest-challenge",
            Scheme::PlayIntegrity => "devicecheck.integrity-nonce",
        }
    }

    /// Names of the input slots the client must populate on resumption.
    pub fn slot_names(&self) -> &'static [&'static str] {
        match self {
            Scheme::AppAttest => &[slots::KEY_ID, slots::ATTESTATION],
            Scheme::PlayIntegrity => &[slots::TOKEN],
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::AppAttest => write!(f, "app-attest"),
            Scheme::PlayIntegrity => write!(f, "play-integrity"),
        }
    }
}

/// Input slot names exchanged with the client.
pub mod slots {
    /// App Attest key identifier (base64).
    pub const KEY_ID: &str = "keyId";
    /// App Attest attestation object (base64 CBOR).
    pub const ATTESTATION: &str = "attestation";
    /// Play Integrity token (opaque).
    pub const TOKEN: &str = "token";
}

/// Client-submitted attestation evidence, tagged by scheme.
#[derive(Clone, PartialEq, Eq)]
pub enum Evidence {
    AppAttest {
        /// Key identifier returned by `DCAppAttestService.generateKey`
        key_id: String,
        /// Decoded CBOR attestation object
        attestation_object: Vec<u8>,
    },
    PlayIntegrity {
        /// Opaque integrity token produced on the device
        integrity_token: String,
    },
}

impl Evidence {
    pub fn scheme(&self) -> Scheme {
        match self {
            Evidence::AppAttest { .. } => Scheme::AppAttest,
            Evidence::PlayIntegrity { .. } => Scheme::PlayIntegrity,
        }
    }
}

// Evidence is client-controlled; keep it out of logs.
impl fmt::Debug for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::AppAttest {
                key_id,
                attestation_object,
            } => f
                .debug_struct("AppAttest")
                .field("key_id", key_id)
                .field("attestation_object_len", &attestation_object.len())
                .finish(),
            Evidence::PlayIntegrity { integrity_token } => f
                .debug_struct("PlayIntegrity")
                .field("integrity_token_len", &integrity_token.len())
                .finish(),
        }
    }
}

/// App recognition verdict reported by Play Integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppRecognitionVerdict {
    /// The app and certificate match the versions distributed by Google Play
    PlayRecognized,
    /// The certificate or package name does not match Google Play records
    UnrecognizedVersion,
    /// Application integrity was not evaluated
    Unevaluated,
    #[serde(other)]
    Unknown,
}

/// Device recognition label reported by Play Integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceRecognitionVerdict {
    MeetsBasicIntegrity,
    MeetsDeviceIntegrity,
    MeetsStrongIntegrity,
    MeetsVirtualIntegrity,
    #[serde(other)]
    Unknown,
}

/// Validated facts produced by a verifier, consumed once by the policy evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawVerdict {
    AppAttest {
        /// Attestation chains to the trust anchor and is bound to the challenge and key id
        attested: bool,
    },
    PlayIntegrity {
        /// Nonce echoed back inside the decoded token
        nonce_echoed: String,
        app_recognition: AppRecognitionVerdict,
        device_recognition: BTreeSet<DeviceRecognitionVerdict>,
    },
}

impl RawVerdict {
    pub fn scheme(&self) -> Scheme {
        match self {
            RawVerdict::AppAttest { .. } => Scheme::AppAttest,
            RawVerdict::PlayIntegrity { .. } => Scheme::PlayIntegrity,
        }
    }
}

/// Classification of a denial that stems from a fault rather than a negative verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Configuration,
    Protocol,
    MalformedEvidence,
    Validation,
    Transport,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Configuration => write!(f, "ConfigurationError"),
            FaultKind::Protocol => write!(f, "ProtocolError"),
            FaultKind::MalformedEvidence => write!(f, "MalformedEvidence"),
            FaultKind::Validation => write!(f, "ValidationError"),
            FaultKind::Transport => write!(f, "TransportError"),
        }
    }
}

/// Terminal outcome of one attestation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    /// Set only when the denial was caused by a fault
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            fault: None,
        }
    }

    /// A genuine negative verdict.
    pub fn deny() -> Self {
        Self {
            allow: false,
            fault: None,
        }
    }

    pub fn deny_with(fault: FaultKind) -> Self {
        Self {
            allow: false,
            fault: Some(fault),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.allow, self.fault) {
            (true, _) => write!(f, "ALLOW"),
            (false, None) => write!(f, "DENY"),
            (false, Some(fault)) => write!(f, "DENY ({})", fault),
        }
    }
}
