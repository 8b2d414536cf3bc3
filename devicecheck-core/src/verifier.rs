//! Attestation verifier interface for multi-scheme device attestation.
//!
//! This module defines the capability every attestation scheme implements,
//! providing a unified `validate` API over structurally different backends.

use crate::config::VerificationConfig;
use crate::types::{Evidence, FaultKind, RawVerdict, Scheme};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Trait for scheme-specific attestation verifiers.
///
/// Each scheme (Apple App Attest, Google Play Integrity) implements this trait
/// to turn client evidence into a [`RawVerdict`] according to its protocol.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    /// The scheme handled by this verifier.
    fn scheme(&self) -> Scheme;

    /// Validate evidence against the challenge issued for this transaction.
    ///
    /// # Arguments
    /// * `evidence` - Decoded client evidence
    /// * `challenge` - The challenge/nonce issued in phase one
    /// * `config` - Deployment configuration for the scheme
    ///
    /// # Returns
    /// The validated facts, or a classified error. Implementations never panic
    /// on hostile input.
    async fn validate(
        &self,
        evidence: &Evidence,
        challenge: &str,
        config: &VerificationConfig,
    ) -> Result<RawVerdict, AttestationError>;
}

/// Errors that can occur while running an attestation transaction.
///
/// The message is an internal diagnostic; only the [`FaultKind`] reaches the client.
#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed evidence: {0}")]
    MalformedEvidence(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AttestationError {
    pub fn kind(&self) -> FaultKind {
        match self {
            AttestationError::Configuration(_) => FaultKind::Configuration,
            AttestationError::Protocol(_) => FaultKind::Protocol,
            AttestationError::MalformedEvidence(_) => FaultKind::MalformedEvidence,
            AttestationError::Validation(_) => FaultKind::Validation,
            AttestationError::Transport(_) => FaultKind::Transport,
        }
    }

    /// Scheme mismatch between evidence, config and verifier.
    pub(crate) fn scheme_mismatch(expected: Scheme, actual: Scheme) -> Self {
        AttestationError::Configuration(format!(
            "scheme mismatch: expected {}, got {}",
            expected, actual
        ))
    }
}

/// Registry of attestation verifiers.
///
/// Allows dynamic selection of a verifier based on the configured scheme.
pub struct VerifierRegistry {
    verifiers: HashMap<Scheme, Box<dyn AttestationVerifier>>,
}

impl VerifierRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    /// Register a verifier, replacing any previous one for the same scheme.
    pub fn register(&mut self, verifier: Box<dyn AttestationVerifier>) {
        self.verifiers.insert(verifier.scheme(), verifier);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, verifier: Box<dyn AttestationVerifier>) -> Self {
        self.register(verifier);
        self
    }

    pub fn get(&self, scheme: Scheme) -> Option<&dyn AttestationVerifier> {
        self.verifiers.get(&scheme).map(|b| b.as_ref())
    }

    /// Get all registered schemes.
    pub fn schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.verifiers.keys().copied().collect();
        schemes.sort();
        schemes
    }

    /// Validate evidence using the verifier registered for its scheme.
    pub async fn validate(
        &self,
        evidence: &Evidence,
        challenge: &str,
        config: &VerificationConfig,
    ) -> Result<RawVerdict, AttestationError> {
        if evidence.scheme() != config.scheme() {
            return Err(AttestationError::scheme_mismatch(
                config.scheme(),
                evidence.scheme(),
            ));
        }

        let verifier = self.get(config.scheme()).ok_or_else(|| {
            AttestationError::Configuration(format!(
                "no verifier registered for {}",
                config.scheme()
            ))
        })?;

        verifier.validate(evidence, challenge, config).await
    }
}

impl Default for VerifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
