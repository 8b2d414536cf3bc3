//! Policy evaluation: raw verdict plus configured trust level to a decision.
//!
//! `Ok(true)` allows, `Ok(false)` is a genuine negative verdict, and `Err` is
//! a classified fault. Every verdict/config pairing lands in exactly one arm.

use crate::config::{CheckLevel, VerificationConfig};
use crate::types::{AppRecognitionVerdict, DeviceRecognitionVerdict, RawVerdict};
use crate::verifier::AttestationError;

/// Decide whether a raw verdict satisfies the configured policy.
///
/// The Play Integrity nonce binding is checked before, and independently of,
/// the check level: it is the only replay defense for that scheme.
pub fn decide(
    verdict: &RawVerdict,
    challenge: &str,
    config: &VerificationConfig,
) -> Result<bool, AttestationError> {
    match (verdict, config) {
        (RawVerdict::AppAttest { attested }, VerificationConfig::AppAttest(_)) => Ok(*attested),

        (
            RawVerdict::PlayIntegrity {
                nonce_echoed,
                app_recognition,
                device_recognition,
            },
            VerificationConfig::PlayIntegrity(cfg),
        ) => {
            if nonce_echoed.as_str() != challenge {
                return Err(AttestationError::Validation(
                    "echoed nonce does not match issued challenge".to_string(),
                ));
            }

            match cfg.check_level {
                CheckLevel::NonceOnly => Ok(true),
                CheckLevel::NonceDeviceApp => Ok(*app_recognition
                    == AppRecognitionVerdict::PlayRecognized
                    && device_recognition.contains(&DeviceRecognitionVerdict::MeetsDeviceIntegrity)),
            }
        }

        (verdict, config) => Err(AttestationError::Configuration(format!(
            "{} verdict cannot be graded by {} policy",
            verdict.scheme(),
            config.scheme()
        ))),
    }
}
