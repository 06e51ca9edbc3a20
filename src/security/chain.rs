// src/security/chain.rs
//! Certificate chain resolution for signatures carrying several certificates.
//!
//! The chain as presented in `X509Data` is searched for the certificate of
//! the XML signing key. Everything before it is ignored. From there a path
//! is built towards the root, and the root's embedded `issuerAltName` key is
//! the authoritative key of the document.

use crate::error::ChainError;
use crate::models::key::KeyMaterial;
use crate::security::certificate::ParsedCertificate;
use log::debug;

/// Certificates in presentation order, index 0 closest to the signer.
#[derive(Debug, Clone, Default)]
pub struct CertificateChain {
    certificates: Vec<ParsedCertificate>,
}

impl CertificateChain {
    /// Creates a chain from already parsed certificates.
    ///
    /// # Arguments
    /// * `certificates` - Certificates in the order they appear in `X509Data`
    ///
    /// # Returns
    /// The chain, unchanged in order. No path validation happens here.
    pub fn new(certificates: Vec<ParsedCertificate>) -> Self {
        Self { certificates }
    }

    /// Parses base64 `X509Certificate` contents. Every entry must be a valid certificate.
    pub fn from_base64_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, ChainError> {
        let certificates = entries
            .iter()
            .map(|entry| ParsedCertificate::from_base64(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(certificates))
    }
}

/// Walks a [`CertificateChain`] from the signer certificate to its root.
pub struct CertificateChainResolver;

impl CertificateChainResolver {
    /// Returns the authoritative root key for the certificate of `signer_key_hex`.
    ///
    /// # Path building
    /// Starting at the signer certificate, the next element is a remaining
    /// certificate whose subject equals the current issuer and whose key
    /// verifies the current certificate. The path ends at a self-issued
    /// certificate or when no such issuer exists. The final certificate must
    /// carry an `issuerAltName` key that verifies its own signature.
    ///
    /// # Errors
    /// - [`ChainError::SignerNotFound`] if no certificate has the signer key
    /// - [`ChainError::MissingRootKey`] if the root has no embedded key
    /// - [`ChainError::IssuerNotFound`] if the path stops at a certificate that
    ///   is neither self-issued nor verifiable with its embedded key
    pub fn resolve(chain: &CertificateChain, signer_key_hex: &str) -> Result<KeyMaterial, ChainError> {
        let start = chain
            .certificates
            .iter()
            .position(|cert| cert.subject_key().hex() == signer_key_hex)
            .ok_or(ChainError::SignerNotFound)?;
        if start > 0 {
            debug!("Ignoring {} certificate(s) before the signer certificate", start);
        }

        let candidates = &chain.certificates[start..];
        let path = build_path(candidates)?;
        let root = &candidates[*path.last().unwrap_or(&0)];
        debug!(
            "Certificate path of length {} ends at \"{}\"",
            path.len(),
            root.subject()
        );

        let root_key = root
            .embedded_issuer_key()
            .map_err(ChainError::InvalidRootKey)?
            .ok_or(ChainError::MissingRootKey)?;

        if !root.is_signed_by(&root_key) {
            if !root.is_self_issued() {
                return Err(ChainError::IssuerNotFound {
                    subject: root.subject(),
                });
            }
            return Err(ChainError::InvalidRootKey(
                "root certificate does not verify against its issuer public key".to_string(),
            ));
        }
        Ok(root_key)
    }
}

/// Indices into `candidates` from the signer (index 0) to the root.
fn build_path(candidates: &[ParsedCertificate]) -> Result<Vec<usize>, ChainError> {
    let mut path = vec![0];
    let mut current = 0;

    while !candidates[current].is_self_issued() {
        let subject = &candidates[current];
        let issuer = (0..candidates.len()).find(|&index| {
            index != current
                && subject.is_issued_by(&candidates[index])
                && subject.is_signed_by(candidates[index].subject_key())
        });
        match issuer {
            Some(index) if path.contains(&index) => return Err(ChainError::CyclicPath),
            Some(index) => {
                path.push(index);
                current = index;
            }
            None => {
                debug!(
                    "No certificate for issuer \"{}\" of \"{}\" in the chain",
                    subject.issuer(),
                    subject.subject()
                );
                break;
            }
        }
    }
    Ok(path)
}
