//! Decoding of client-submitted evidence.
//!
//! The host callback framework pre-fills every input slot with a placeholder
//! value. Placeholders are collapsed to "absent" when slots enter the crate, so
//! everything downstream only ever sees `Option`.

use crate::types::{slots, Evidence, Scheme};
use crate::verifier::AttestationError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use std::fmt;

/// Value the host puts in an input slot the client has not populated.
pub const PLACEHOLDER: &str = "false";

/// Input slot values read back from the client on resumption.
#[derive(Clone, Default)]
pub struct SubmittedSlots {
    values: HashMap<String, String>,
}

impl SubmittedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw slot value; placeholders and blank values are dropped.
    pub fn insert(&mut self, name: impl Into<String>, raw: impl Into<String>) {
        let name = name.into();
        match submitted(raw.into()) {
            Some(value) => {
                self.values.insert(name, value);
            }
            None => {
                self.values.remove(&name);
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, raw: impl Into<String>) -> Self {
        self.insert(name, raw);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SubmittedSlots {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut slots = SubmittedSlots::new();
        for (name, raw) in iter {
            slots.insert(name, raw);
        }
        slots
    }
}

impl fmt::Debug for SubmittedSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SubmittedSlots")
            .field("populated", &names)
            .finish()
    }
}

fn submitted(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode the scheme's evidence from submitted slots.
///
/// Missing slots are protocol errors; an undecodable attestation blob is
/// malformed evidence.
pub fn decode(slots: &SubmittedSlots, scheme: Scheme) -> Result<Evidence, AttestationError> {
    match scheme {
        Scheme::AppAttest => {
            let key_id = required(slots, slots::KEY_ID)?;
            let attestation = required(slots, slots::ATTESTATION)?;

            let attestation_object = STANDARD.decode(attestation).map_err(|e| {
                AttestationError::MalformedEvidence(format!("attestation is not base64: {}", e))
            })?;
            if attestation_object.is_empty() {
                return Err(AttestationError::MalformedEvidence(
                    "attestation object is empty".to_string(),
                ));
            }

            Ok(Evidence::AppAttest {
                key_id: key_id.to_string(),
                attestation_object,
            })
        }
        Scheme::PlayIntegrity => {
            let token = required(slots, slots::TOKEN)?;
            Ok(Evidence::PlayIntegrity {
                integrity_token: token.to_string(),
            })
        }
    }
}

fn required<'a>(slots: &'a SubmittedSlots, name: &str) -> Result<&'a str, AttestationError> {
    slots
        .get(name)
        .ok_or_else(|| AttestationError::Protocol(format!("input slot {} not submitted", name)))
}
