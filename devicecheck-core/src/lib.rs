//! # DeviceCheck Core
//!
//! Scheme-independent half of a device attestation gate for an
//! authentication pipeline.
//!
//! ## Key Features
//! - **Two-phase protocol**: challenge issuance, evidence callbacks, one terminal decision
//! - **Single-use transactions**: bound challenges that are always discarded on resume
//! - **Pluggable verifiers**: Apple App Attest and Google Play Integrity behind one trait
//! - **Policy evaluation**: configured trust level graded against a raw verdict
//! - **Classified faults**: every denial carries the kind of failure that caused it

pub mod config;
pub mod evidence;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod transaction;
pub mod types;
pub mod verifier;

pub use config::{
    AppAttestConfig, AppAttestEnvironment, CheckLevel, GateSettings, PlayIntegrityConfig,
    VerificationConfig,
};
pub use evidence::{SubmittedSlots, PLACEHOLDER};
pub use protocol::{AttestationGate, InputSlot, Outcome, Phase, Prompt};
pub use session::{MemorySession, SessionState};
pub use transaction::{Transaction, TransactionStore};
pub use types::*;
pub use verifier::{AttestationError, AttestationVerifier, VerifierRegistry};
