// src/security/certificate.rs
//! X.509 certificates embedded in TokenScript signatures.
//!
//! TokenScript certificate authorities are self-signed certificates that carry
//! the authoritative root public key as a raw secp256k1 point inside their own
//! `issuerAltName` extension. Signature algorithms with no public key recovery
//! (RSA) still work this way since the key travels with the certificate.

use crate::error::ChainError;
use crate::models::key::{KeyMaterial, SignatureScheme};
use crate::utils::encoding::decode_base64;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// `issuerAltName` extension
pub const ISSUER_ALT_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.18");
/// `ecdsa-with-SHA256`
pub const ECDSA_WITH_SHA256_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
/// `sha256WithRSAEncryption`
pub const SHA256_WITH_RSA_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
/// `sha512WithRSAEncryption`
pub const SHA512_WITH_RSA_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// A decoded certificate with its subject key already imported.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    certificate: Certificate,
    subject_key: KeyMaterial,
    tbs_der: Vec<u8>,
}

impl ParsedCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, ChainError> {
        let certificate =
            Certificate::from_der(der).map_err(|e| ChainError::Certificate(e.to_string()))?;
        let subject_key =
            KeyMaterial::from_spki(&certificate.tbs_certificate.subject_public_key_info)
                .map_err(ChainError::Certificate)?;
        let tbs_der = certificate
            .tbs_certificate
            .to_der()
            .map_err(|e| ChainError::Certificate(e.to_string()))?;
        Ok(Self {
            certificate,
            subject_key,
            tbs_der,
        })
    }

    /// Parses the base64 content of an `X509Certificate` element.
    pub fn from_base64(text: &str) -> Result<Self, ChainError> {
        let der = decode_base64(text).map_err(ChainError::Certificate)?;
        Self::from_der(&der)
    }

    pub fn subject_key(&self) -> &KeyMaterial {
        &self.subject_key
    }

    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.certificate.tbs_certificate.issuer.to_string()
    }

    /// True when `self` names `other` as its issuer.
    pub fn is_issued_by(&self, other: &ParsedCertificate) -> bool {
        self.certificate.tbs_certificate.issuer == other.certificate.tbs_certificate.subject
    }

    pub fn is_self_issued(&self) -> bool {
        self.is_issued_by(self)
    }

    /// The root public key stored in the `issuerAltName` extension.
    ///
    /// Returns `Ok(None)` when the extension is absent and `Err` when its
    /// content is not a valid secp256k1 point.
    pub fn embedded_issuer_key(&self) -> Result<Option<KeyMaterial>, String> {
        let extension = self
            .certificate
            .tbs_certificate
            .extensions
            .as_ref()
            .and_then(|extensions| {
                extensions
                    .iter()
                    .find(|extension| extension.extn_id == ISSUER_ALT_NAME_OID)
            });
        match extension {
            Some(extension) => KeyMaterial::from_sec1_bytes(extension.extn_value.as_bytes()).map(Some),
            None => Ok(None),
        }
    }

    /// Checks the certificate signature against `key`.
    pub fn is_signed_by(&self, key: &KeyMaterial) -> bool {
        let oid = self.certificate.signature_algorithm.oid;
        let scheme = if oid == ECDSA_WITH_SHA256_OID {
            SignatureScheme::EcdsaSha256Der
        } else if oid == SHA256_WITH_RSA_OID {
            SignatureScheme::RsaPkcs1Sha256
        } else if oid == SHA512_WITH_RSA_OID {
            SignatureScheme::RsaPkcs1Sha512
        } else {
            log::debug!("Unsupported certificate signature algorithm {}", oid);
            return false;
        };
        match self.certificate.signature.as_bytes() {
            Some(signature) => key.verify(scheme, &self.tbs_der, signature),
            None => false,
        }
    }
}
