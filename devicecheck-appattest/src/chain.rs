//! Credential certificate chain verification.

use chrono::{DateTime, Utc};
use der_parser::der::{parse_der_octetstring, parse_der_sequence_defined_g, parse_der_tagged_explicit_g};
use der_parser::error::{BerError, BerResult};
use der_parser::nom;
use thiserror::Error;
use x509_parser::prelude::{parse_x509_certificate, ASN1Time, X509Certificate};

/// Apple's extension carrying SHA-256(authData || clientDataHash).
pub const NONCE_EXTENSION_OID: &str = "1.2.840.113635.100.8.2";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Empty certificate chain")]
    EmptyChain,

    #[error("Certificate {index} could not be parsed: {reason}")]
    Parse { index: usize, reason: String },

    #[error("Invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    #[error("Signature on certificate {index} does not verify: {reason}")]
    InvalidSignature { index: usize, reason: String },

    #[error("Certificate {0} expired or not yet valid")]
    Expired(usize),

    #[error("Issuer of certificate {0} is not a certificate authority")]
    NotCa(usize),

    #[error("Credential certificate has no nonce extension")]
    MissingNonce,

    #[error("Malformed nonce extension: {0}")]
    MalformedNonce(String),
}

/// A root certificate attestation chains must terminate in.
#[derive(Clone)]
pub struct TrustAnchor {
    der: Vec<u8>,
    subject: String,
}

impl TrustAnchor {
    pub fn from_pem(pem: &str) -> Result<Self, ChainError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| ChainError::InvalidTrustAnchor(e.to_string()))?;
        Self::from_der(pem.contents)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self, ChainError> {
        let (_, cert) = parse_x509_certificate(&der)
            .map_err(|e| ChainError::InvalidTrustAnchor(e.to_string()))?;
        let subject = cert.subject().to_string();
        Ok(Self { der, subject })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("subject", &self.subject)
            .finish()
    }
}

/// What the verified leaf certificate attests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCertificate {
    /// Uncompressed EC point of the attested key
    pub public_key: Vec<u8>,
    pub common_name: Option<String>,
    /// Contents of the nonce extension
    pub nonce: Vec<u8>,
}

/// Verify an x5c chain (leaf first) up to the trust anchor at `at`.
///
/// ## Verification Steps
/// 1. Parse every certificate in the chain and the anchor
/// 2. Require every issuer to be a CA allowed to sign certificates
/// 3. Verify each signature with the next certificate's key, the last with the anchor
/// 4. Check every validity period, the anchor's included, at `at`
/// 5. Extract the attested key and nonce from the leaf
pub fn verify_chain(
    x5c: &[Vec<u8>],
    anchor: &TrustAnchor,
    at: DateTime<Utc>,
) -> Result<CredentialCertificate, ChainError> {
    if x5c.is_empty() {
        return Err(ChainError::EmptyChain);
    }

    let certs = x5c
        .iter()
        .enumerate()
        .map(|(index, der)| {
            parse_x509_certificate(der)
                .map(|(_, cert)| cert)
                .map_err(|e| ChainError::Parse {
                    index,
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (_, root) = parse_x509_certificate(&anchor.der)
        .map_err(|e| ChainError::InvalidTrustAnchor(e.to_string()))?;

    let time = ASN1Time::from_timestamp(at.timestamp())
        .map_err(|e| ChainError::InvalidTrustAnchor(format!("unrepresentable time: {}", e)))?;

    for (index, cert) in certs.iter().enumerate() {
        let issuer = certs.get(index + 1).unwrap_or(&root);
        if !is_certificate_authority(issuer) {
            return Err(ChainError::NotCa(index));
        }
        cert.verify_signature(Some(issuer.public_key()))
            .map_err(|e| ChainError::InvalidSignature {
                index,
                reason: e.to_string(),
            })?;

        if !cert.validity().is_valid_at(time) {
            return Err(ChainError::Expired(index));
        }
    }
    if !root.validity().is_valid_at(time) {
        return Err(ChainError::Expired(certs.len()));
    }

    tracing::debug!(
        chain_len = certs.len(),
        anchor = %anchor.subject,
        "Verified credential certificate chain"
    );

    let leaf = &certs[0];
    let extension = leaf
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == NONCE_EXTENSION_OID)
        .ok_or(ChainError::MissingNonce)?;

    let common_name = leaf
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let credential = CredentialCertificate {
        public_key: leaf.public_key().subject_public_key.data.to_vec(),
        common_name,
        nonce: parse_nonce_extension(extension.value)?,
    };
    Ok(credential)
}

/// `cA` set in basicConstraints, and keyCertSign if key usage is present.
fn is_certificate_authority(cert: &X509Certificate<'_>) -> bool {
    let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);
    let can_sign = match cert.key_usage() {
        Ok(Some(usage)) => usage.value.key_cert_sign(),
        Ok(None) => true,
        Err(_) => false,
    };
    is_ca && can_sign
}

/// Parse `SEQUENCE { [1] EXPLICIT OCTET STRING }`.
pub fn parse_nonce_extension(value: &[u8]) -> Result<Vec<u8>, ChainError> {
    let (_, nonce) = parse_der_sequence_defined_g(|content, _| {
        parse_der_tagged_explicit_g(1u32, |inner, _| -> BerResult<Vec<u8>> {
            let (rest, object) = parse_der_octetstring(inner)?;
            let bytes = object.as_slice().map_err(nom::Err::Error)?.to_vec();
            Ok((rest, bytes))
        })(content)
    })(value)
    .map_err(|e: nom::Err<BerError>| ChainError::MalformedNonce(e.to_string()))?;

    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nonce_extension() {
        let mut value = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
        value.extend_from_slice(&[0x5a; 32]);
        assert_eq!(parse_nonce_extension(&value).unwrap(), vec![0x5a; 32]);
    }

    #[test]
    fn test_nonce_extension_wrong_tag() {
        let mut value = vec![0x30, 0x24, 0xa2, 0x22, 0x04, 0x20];
        value.extend_from_slice(&[0x5a; 32]);
        assert!(matches!(
            parse_nonce_extension(&value),
            Err(ChainError::MalformedNonce(_))
        ));
    }

    #[test]
    fn test_nonce_extension_truncated() {
        assert!(parse_nonce_extension(&[0x30, 0x24, 0xa1]).is_err());
    }

    #[test]
    fn test_empty_chain() {
        let anchor = TrustAnchor::from_pem(crate::APPLE_APP_ATTESTATION_ROOT_CA).unwrap();
        assert!(matches!(
            verify_chain(&[], &anchor, Utc::now()),
            Err(ChainError::EmptyChain)
        ));
    }

    #[test]
    fn test_root_anchor_parses() {
        let anchor = TrustAnchor::from_pem(crate::APPLE_APP_ATTESTATION_ROOT_CA).unwrap();
        assert!(anchor.subject().contains("Apple App Attestation Root CA"));
    }

    #[test]
    fn test_invalid_anchor() {
        assert!(matches!(
            TrustAnchor::from_pem("not a certificate"),
            Err(ChainError::InvalidTrustAnchor(_))
        ));
    }

    #[test]
    fn test_garbage_certificate() {
        let anchor = TrustAnchor::from_pem(crate::APPLE_APP_ATTESTATION_ROOT_CA).unwrap();
        assert!(matches!(
            verify_chain(&[vec![0x30, 0x03, 0x02, 0x01, 0x00]], &anchor, Utc::now()),
            Err(ChainError::Parse { index: 0, .. })
        ));
    }
}
