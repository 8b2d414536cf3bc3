//! App Attest attestation object parsing.

use serde::Deserialize;
use thiserror::Error;

/// Value of `fmt` in every App Attest attestation object.
pub const APPLE_APPATTEST_FORMAT: &str = "apple-appattest";

/// Attested credential data flag (bit 6).
const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

#[derive(Debug, Error)]
pub enum AttestationObjectError {
    #[error("CBOR decoding error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("Unsupported attestation format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid authenticator data length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Attested credential data flag not set (flags {0:#04x})")]
    MissingCredentialData(u8),
}

/// CBOR attestation object produced by `DCAppAttestService.attestKey`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationObject {
    pub fmt: String,
    #[serde(rename = "attStmt")]
    pub att_stmt: AttestationStatement,
    pub auth_data: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationStatement {
    /// Leaf credential certificate first, then intermediates (DER)
    pub x5c: Vec<Vec<u8>>,
    /// Opaque fraud-risk receipt; not evaluated
    #[serde(default)]
    pub receipt: Vec<u8>,
}

impl AttestationObject {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, AttestationObjectError> {
        let object: AttestationObject = ciborium::from_reader(bytes)?;
        if object.fmt != APPLE_APPATTEST_FORMAT {
            return Err(AttestationObjectError::UnsupportedFormat(object.fmt));
        }
        Ok(object)
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData, AttestationObjectError> {
        parse_authenticator_data(&self.auth_data)
    }
}

/// Fixed-layout WebAuthn authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub counter: u32,
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
}

/// Parse authenticator data.
///
/// ## Layout
/// ```text
/// [32] rp_id_hash      SHA-256 of "<team id>.<bundle id>"
/// [1]  flags
/// [4]  sign_count      big endian, 0 for a fresh attestation
/// [16] aaguid          "appattestdevelop" or "appattest" + 7 NUL
/// [2]  cred_id_len     big endian
/// [cred_id_len] credential_id
/// [..] credential public key (COSE), ignored
/// ```
pub fn parse_authenticator_data(data: &[u8]) -> Result<AuthenticatorData, AttestationObjectError> {
    const HEADER_LEN: usize = 32 + 1 + 4 + 16 + 2;

    if data.len() < HEADER_LEN {
        return Err(AttestationObjectError::InvalidLength {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&data[0..32]);

    let flags = data[32];
    if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
        return Err(AttestationObjectError::MissingCredentialData(flags));
    }

    let counter = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&data[37..53]);

    let credential_id_len = u16::from_be_bytes([data[53], data[54]]) as usize;
    if data.len() < HEADER_LEN + credential_id_len {
        return Err(AttestationObjectError::InvalidLength {
            expected: HEADER_LEN + credential_id_len,
            actual: data.len(),
        });
    }
    let credential_id = data[HEADER_LEN..HEADER_LEN + credential_id_len].to_vec();

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        counter,
        aaguid,
        credential_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_data(flags: u8, counter: u32, credential_id: &[u8]) -> Vec<u8> {
        let mut data = vec![0xab; 32];
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data.extend_from_slice(b"appattestdevelop");
        data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
        data.extend_from_slice(credential_id);
        data
    }

    #[test]
    fn test_parse_authenticator_data() {
        let parsed = parse_authenticator_data(&auth_data(0x40, 0, &[7; 32])).unwrap();
        assert_eq!(parsed.rp_id_hash, [0xab; 32]);
        assert_eq!(parsed.counter, 0);
        assert_eq!(&parsed.aaguid, b"appattestdevelop");
        assert_eq!(parsed.credential_id, vec![7; 32]);
    }

    #[test]
    fn test_authenticator_data_too_short() {
        let result = parse_authenticator_data(&[0u8; 54]);
        assert!(matches!(
            result,
            Err(AttestationObjectError::InvalidLength {
                expected: 55,
                actual: 54
            })
        ));
    }

    #[test]
    fn test_credential_id_overruns_data() {
        let mut data = auth_data(0x40, 0, &[7; 32]);
        data.truncate(70);
        assert!(matches!(
            parse_authenticator_data(&data),
            Err(AttestationObjectError::InvalidLength { expected: 87, .. })
        ));
    }

    #[test]
    fn test_missing_attested_credential_flag() {
        assert!(matches!(
            parse_authenticator_data(&auth_data(0x01, 0, &[7; 32])),
            Err(AttestationObjectError::MissingCredentialData(0x01))
        ));
    }

    #[test]
    fn test_garbage_is_not_cbor() {
        assert!(matches!(
            AttestationObject::from_cbor(b"not cbor"),
            Err(AttestationObjectError::Decode(_))
        ));
    }
}
