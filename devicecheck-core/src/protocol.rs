//! Two-phase attestation protocol.
//!
//! ```text
//! START ──issue challenge──▶ AWAITING_EVIDENCE ──validate + decide──▶ DECIDED(ALLOW|DENY)
//! ```
//!
//! Phase one issues a single-use challenge and emits it to the client along
//! with placeholder input slots. Phase two reads the bound challenge, decodes
//! the evidence, dispatches to the configured verifier, grades the verdict and
//! always discards the transaction. A denial ends the flow; another attempt
//! starts again from START.

use crate::config::{GateSettings, VerificationConfig};
use crate::evidence::{self, SubmittedSlots, PLACEHOLDER};
use crate::policy;
use crate::session::SessionState;
use crate::transaction::TransactionStore;
use crate::types::{Decision, FaultKind, Scheme};
use crate::verifier::{AttestationError, VerifierRegistry};
use serde::Serialize;
use serde_json::json;

/// Where the host is in the two-phase exchange.
#[derive(Debug, Clone, Copy)]
pub enum Phase<'a> {
    /// First entry, no callbacks yet
    Start,
    /// The client answered the prompt
    Resume(&'a SubmittedSlots),
}

/// A named input slot the client fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSlot {
    pub id: String,
    /// Placeholder the host reports back while the slot is unpopulated
    pub value: String,
}

/// Out-of-band prompt sent to the client in phase one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub scheme: Scheme,
    pub challenge: String,
    /// Structured metadata callback payload
    pub metadata: serde_json::Value,
    pub slots: Vec<InputSlot>,
}

impl Prompt {
    fn new(scheme: Scheme, challenge: &str) -> Self {
        let metadata = match scheme {
            Scheme::AppAttest => json!({
                "_action": "appattest",
                "challenge": challenge,
                "_type": "AppAttest",
            }),
            Scheme::PlayIntegrity => json!({
                "_action": "integritycheck",
                "nonce": challenge,
                "_type": "integritycheck",
            }),
        };

        let slots = scheme
            .slot_names()
            .iter()
            .map(|id| InputSlot {
                id: (*id).to_string(),
                value: PLACEHOLDER.to_string(),
            })
            .collect();

        Self {
            scheme,
            challenge: challenge.to_string(),
            metadata,
            slots,
        }
    }
}

/// What the host should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send the prompt and wait for the client to resume
    Emit(Prompt),
    /// Terminal decision
    Decided(Decision),
}

impl Outcome {
    pub fn decision(&self) -> Option<Decision> {
        match self {
            Outcome::Emit(_) => None,
            Outcome::Decided(decision) => Some(*decision),
        }
    }
}

/// Orchestrates the challenge-response flow for every configured scheme.
pub struct AttestationGate {
    verifiers: VerifierRegistry,
    settings: GateSettings,
}

impl AttestationGate {
    pub fn new(verifiers: VerifierRegistry) -> Self {
        Self::with_settings(verifiers, GateSettings::default())
    }

    pub fn with_settings(verifiers: VerifierRegistry, settings: GateSettings) -> Self {
        Self {
            verifiers,
            settings,
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Advance the protocol for one authentication attempt.
    ///
    /// Never fails: every fault resolves to a classified denial.
    pub async fn evaluate(
        &self,
        phase: Phase<'_>,
        session: &mut dyn SessionState,
        config: &VerificationConfig,
    ) -> Outcome {
        let scheme = config.scheme();
        let store = TransactionStore::new(scheme, self.settings.challenge_ttl);

        match phase {
            Phase::Start => match self.start(&store, session, config) {
                Ok(prompt) => Outcome::Emit(prompt),
                Err(e) => Outcome::Decided(deny(scheme, &e)),
            },
            Phase::Resume(slots) => {
                let result = self.resume(&store, session, slots, config).await;
                store.consume(session);

                let decision = match result {
                    Ok(true) => Decision::allow(),
                    Ok(false) => {
                        tracing::info!(scheme = %scheme, "Attestation verdict did not meet policy");
                        Decision::deny()
                    }
                    Err(e) => deny(scheme, &e),
                };
                tracing::info!(scheme = %scheme, decision = %decision, "Attestation decided");
                Outcome::Decided(decision)
            }
        }
    }

    fn start(
        &self,
        store: &TransactionStore,
        session: &mut dyn SessionState,
        config: &VerificationConfig,
    ) -> Result<Prompt, AttestationError> {
        config.validate()?;
        let transaction = store.issue(session)?;
        tracing::info!(scheme = %config.scheme(), "Sending attestation challenge");
        Ok(Prompt::new(config.scheme(), transaction.challenge()))
    }

    async fn resume(
        &self,
        store: &TransactionStore,
        session: &mut dyn SessionState,
        slots: &SubmittedSlots,
        config: &VerificationConfig,
    ) -> Result<bool, AttestationError> {
        config.validate()?;
        let scheme = config.scheme();

        let transaction = store.peek(session)?;
        let evidence = evidence::decode(slots, scheme)?;
        tracing::debug!(scheme = %scheme, ?evidence, "Received attestation evidence");

        let challenge = transaction.challenge();
        let verdict = tokio::time::timeout(
            self.settings.verification_timeout,
            self.verifiers.validate(&evidence, challenge, config),
        )
        .await
        .map_err(|_| {
            AttestationError::Transport(format!(
                "verification did not complete within {:?}",
                self.settings.verification_timeout
            ))
        })??;

        tracing::debug!(scheme = %scheme, ?verdict, "Verifier returned raw verdict");
        policy::decide(&verdict, challenge, config)
    }
}

fn deny(scheme: Scheme, error: &AttestationError) -> Decision {
    match error.kind() {
        FaultKind::Transport => {
            tracing::error!(scheme = %scheme, error = %error, "Could not check attestation")
        }
        FaultKind::Configuration => {
            tracing::error!(scheme = %scheme, error = %error, "Attestation misconfigured")
        }
        FaultKind::Validation => {
            tracing::warn!(scheme = %scheme, error = %error, "Attestation checked and rejected")
        }
        FaultKind::Protocol | FaultKind::MalformedEvidence => {
            tracing::warn!(scheme = %scheme, error = %error, "Attestation exchange failed")
        }
    }
    Decision::deny_with(error.kind())
}
