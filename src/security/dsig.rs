// src/security/dsig.rs
//! XML digital signature verification for TokenScript documents.
//!
//! Verification has two stages:
//! 1. Integrity: every `Reference` digest and the `SignatureValue` over the
//!    canonicalized `SignedInfo` must verify with the signer key.
//! 2. Authority: the signer key is mapped to the authoritative key, either the
//!    signer key itself, the root key embedded in a single self-signed
//!    certificate, or the root key found by [`CertificateChainResolver`].
//!
//! Supported algorithms:
//! - Canonicalization: C14N 1.0/1.1 and exclusive C14N, with or without comments
//! - Transforms: enveloped signature and the canonicalization methods above
//! - Digests: SHA-256, SHA-384, SHA-512
//! - Signatures: ECDSA secp256k1 SHA-256, RSA PKCS#1 v1.5 SHA-256/SHA-512

use crate::error::VerificationError;
use crate::models::document::TokenScriptDocument;
use crate::models::key::{KeyMaterial, SignatureScheme};
use crate::models::verdict::{SignerKeys, TrustVerdict};
use crate::security::certificate::ParsedCertificate;
use crate::security::chain::{CertificateChain, CertificateChainResolver};
use crate::utils::encoding::decode_base64;
use crate::xml::c14n::{canonicalize_document, canonicalize_subtree, C14nMethod};
use crate::xml::dom::{Document, Element, Located};
use log::{debug, info, warn};
use sha2::{Digest, Sha256, Sha384, Sha512};

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const DSIG11_NS: &str = "http://www.w3.org/2009/xmldsig11#";
pub const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

/// Named curve of secp256k1 ECKeyValue entries.
pub const SECP256K1_CURVE_URN: &str = "urn:oid:1.3.132.0.10";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    fn from_uri(uri: &str) -> Result<Self, VerificationError> {
        match uri {
            DIGEST_SHA256 => Ok(DigestAlgorithm::Sha256),
            DIGEST_SHA384 => Ok(DigestAlgorithm::Sha384),
            DIGEST_SHA512 => Ok(DigestAlgorithm::Sha512),
            other => Err(VerificationError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transform {
    Enveloped,
    Canonicalize(C14nMethod),
}

#[derive(Debug)]
struct Reference {
    uri: String,
    transforms: Vec<Transform>,
    digest_algorithm: DigestAlgorithm,
    digest_value: Vec<u8>,
}

/// The parsed content of a `Signature` element.
struct SignatureBlock<'a> {
    signature: &'a Element,
    signed_info: Located<'a>,
    canonicalization: C14nMethod,
    scheme: SignatureScheme,
    references: Vec<Reference>,
    signature_value: Vec<u8>,
    key_value: Option<KeyMaterial>,
    certificates: Vec<String>,
}

impl<'a> SignatureBlock<'a> {
    fn parse(located: &Located<'a>) -> Result<Self, VerificationError> {
        let signed_info = located
            .child(DSIG_NS, "SignedInfo")
            .ok_or_else(|| malformed("missing SignedInfo"))?;

        let c14n_element = signed_info
            .element
            .child(DSIG_NS, "CanonicalizationMethod")
            .ok_or_else(|| malformed("missing CanonicalizationMethod"))?;
        let canonicalization = c14n_method(c14n_element)?;

        let method_uri = signed_info
            .element
            .child(DSIG_NS, "SignatureMethod")
            .and_then(|method| method.attribute("Algorithm"))
            .ok_or_else(|| malformed("missing SignatureMethod"))?;
        let scheme = match method_uri {
            ECDSA_SHA256 => SignatureScheme::EcdsaSha256Raw,
            RSA_SHA256 => SignatureScheme::RsaPkcs1Sha256,
            RSA_SHA512 => SignatureScheme::RsaPkcs1Sha512,
            other => return Err(VerificationError::UnsupportedAlgorithm(other.to_string())),
        };

        let references = signed_info
            .element
            .child_elements()
            .filter(|el| el.is(DSIG_NS, "Reference"))
            .map(parse_reference)
            .collect::<Result<Vec<_>, _>>()?;
        if references.is_empty() {
            return Err(malformed("SignedInfo has no Reference"));
        }

        let signature_value = located
            .element
            .child(DSIG_NS, "SignatureValue")
            .map(|value| decode_base64(&value.text()))
            .ok_or_else(|| malformed("missing SignatureValue"))?
            .map_err(VerificationError::MalformedSignature)?;

        let (key_value, certificates) = match located.element.child(DSIG_NS, "KeyInfo") {
            Some(key_info) => parse_key_info(key_info)?,
            None => (None, Vec::new()),
        };

        Ok(Self {
            signature: located.element,
            signed_info,
            canonicalization,
            scheme,
            references,
            signature_value,
            key_value,
            certificates,
        })
    }

    fn check_references(&self, document: &Document) -> Result<(), VerificationError> {
        for reference in &self.references {
            let octets = reference_octets(document, self.signature, reference)?;
            let digest = reference.digest_algorithm.digest(octets.as_bytes());
            if digest != reference.digest_value {
                debug!("Digest mismatch for reference \"{}\"", reference.uri);
                return Err(VerificationError::DigestMismatch {
                    uri: reference.uri.clone(),
                });
            }
        }
        Ok(())
    }

    /// Signer key from `KeyValue`, else the first certificate's subject key.
    fn signer_key(&self) -> Result<KeyMaterial, VerificationError> {
        if let Some(key) = &self.key_value {
            return Ok(key.clone());
        }
        let first = self
            .certificates
            .first()
            .ok_or_else(|| malformed("KeyInfo has no KeyValue or X509Certificate"))?;
        Ok(ParsedCertificate::from_base64(first)?.subject_key().clone())
    }

    fn check_signature_value(&self, key: &KeyMaterial) -> Result<(), VerificationError> {
        let canonical = canonicalize_subtree(&self.signed_info, &self.canonicalization, None);
        if key.verify(self.scheme, canonical.as_bytes(), &self.signature_value) {
            Ok(())
        } else {
            Err(VerificationError::SignatureInvalid)
        }
    }
}

fn malformed(reason: &str) -> VerificationError {
    VerificationError::MalformedSignature(reason.to_string())
}

fn c14n_method(element: &Element) -> Result<C14nMethod, VerificationError> {
    let uri = element
        .attribute("Algorithm")
        .ok_or_else(|| malformed("canonicalization method without Algorithm"))?;
    let method = C14nMethod::from_uri(uri)
        .ok_or_else(|| VerificationError::UnsupportedAlgorithm(uri.to_string()))?;
    Ok(match element
        .child(EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|inclusive| inclusive.attribute("PrefixList"))
    {
        Some(prefix_list) => method.with_prefix_list(prefix_list),
        None => method,
    })
}

fn parse_reference(element: &Element) -> Result<Reference, VerificationError> {
    let uri = element.attribute("URI").unwrap_or("").to_string();

    let mut transforms = Vec::new();
    if let Some(list) = element.child(DSIG_NS, "Transforms") {
        for transform in list.child_elements().filter(|el| el.is(DSIG_NS, "Transform")) {
            match transform.attribute("Algorithm") {
                Some(ENVELOPED_SIGNATURE) => transforms.push(Transform::Enveloped),
                Some(_) => transforms.push(Transform::Canonicalize(c14n_method(transform)?)),
                None => return Err(malformed("transform without Algorithm")),
            }
        }
    }

    let digest_algorithm = element
        .child(DSIG_NS, "DigestMethod")
        .and_then(|method| method.attribute("Algorithm"))
        .ok_or_else(|| malformed("reference without DigestMethod"))
        .and_then(DigestAlgorithm::from_uri)?;
    let digest_value = element
        .child(DSIG_NS, "DigestValue")
        .map(|value| decode_base64(&value.text()))
        .ok_or_else(|| malformed("reference without DigestValue"))?
        .map_err(VerificationError::MalformedSignature)?;

    Ok(Reference {
        uri,
        transforms,
        digest_algorithm,
        digest_value,
    })
}

fn parse_key_info(key_info: &Element) -> Result<(Option<KeyMaterial>, Vec<String>), VerificationError> {
    let key_value = match key_info.child(DSIG_NS, "KeyValue") {
        Some(value) => Some(parse_key_value(value)?),
        None => None,
    };
    let certificates = key_info
        .child_elements()
        .filter(|el| el.is(DSIG_NS, "X509Data"))
        .flat_map(|data| data.child_elements())
        .filter(|el| el.is(DSIG_NS, "X509Certificate"))
        .map(|cert| cert.text())
        .collect();
    Ok((key_value, certificates))
}

fn parse_key_value(key_value: &Element) -> Result<KeyMaterial, VerificationError> {
    if let Some(ec) = key_value.child(DSIG11_NS, "ECKeyValue") {
        let curve = ec
            .child(DSIG11_NS, "NamedCurve")
            .and_then(|curve| curve.attribute("URI"))
            .ok_or_else(|| {
                VerificationError::UnsupportedAlgorithm("ECKeyValue without NamedCurve".to_string())
            })?;
        if curve != SECP256K1_CURVE_URN {
            return Err(VerificationError::UnsupportedAlgorithm(curve.to_string()));
        }
        let point = ec
            .child(DSIG11_NS, "PublicKey")
            .map(|key| decode_base64(&key.text()))
            .ok_or_else(|| malformed("ECKeyValue without PublicKey"))?
            .map_err(VerificationError::MalformedSignature)?;
        return KeyMaterial::from_sec1_bytes(&point).map_err(VerificationError::MalformedSignature);
    }

    if let Some(rsa) = key_value.child(DSIG_NS, "RSAKeyValue") {
        let component = |name: &str| {
            rsa.child(DSIG_NS, name)
                .map(|el| decode_base64(&el.text()))
                .ok_or_else(|| malformed("incomplete RSAKeyValue"))?
                .map_err(VerificationError::MalformedSignature)
        };
        let modulus = component("Modulus")?;
        let exponent = component("Exponent")?;
        return KeyMaterial::from_rsa_components(&modulus, &exponent)
            .map_err(VerificationError::MalformedSignature);
    }

    Err(VerificationError::UnsupportedAlgorithm(
        "KeyValue must be ECKeyValue or RSAKeyValue".to_string(),
    ))
}

/// Canonical octets a reference digest is computed over.
fn reference_octets(
    document: &Document,
    signature: &Element,
    reference: &Reference,
) -> Result<String, VerificationError> {
    let exclude = reference
        .transforms
        .contains(&Transform::Enveloped)
        .then_some(signature);
    let mut method = reference
        .transforms
        .iter()
        .rev()
        .find_map(|transform| match transform {
            Transform::Canonicalize(method) => Some(method.clone()),
            Transform::Enveloped => None,
        })
        .unwrap_or(C14nMethod::Inclusive { with_comments: false });

    let uri = reference.uri.as_str();
    if uri.is_empty() || uri == "#xpointer(/)" {
        if uri.is_empty() {
            method = without_comments(method);
        }
        return Ok(canonicalize_document(document, &method, exclude));
    }

    let id = uri
        .strip_prefix("#xpointer(id('")
        .and_then(|rest| rest.strip_suffix("'))"))
        .or_else(|| uri.strip_prefix('#'))
        .ok_or_else(|| {
            VerificationError::UnsupportedAlgorithm(format!("external reference \"{}\"", uri))
        })?;
    if !uri.starts_with("#xpointer") {
        method = without_comments(method);
    }

    let mut targets = document.find_all(|el| {
        ["Id", "ID", "id"]
            .iter()
            .any(|name| el.attribute(name) == Some(id))
    });
    if targets.len() != 1 {
        return Err(malformed(&format!(
            "reference \"{}\" matched {} elements",
            uri,
            targets.len()
        )));
    }
    let target = targets.remove(0);
    Ok(canonicalize_subtree(&target, &method, exclude))
}

fn without_comments(method: C14nMethod) -> C14nMethod {
    match method {
        C14nMethod::Inclusive { .. } => C14nMethod::Inclusive { with_comments: false },
        C14nMethod::Exclusive {
            inclusive_prefixes, ..
        } => C14nMethod::Exclusive {
            with_comments: false,
            inclusive_prefixes,
        },
    }
}

/// Verifies the XML signature and key provenance of TokenScript documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Creates a verifier.
    ///
    /// # Returns
    /// A stateless verifier. One instance can check any number of documents.
    pub fn new() -> Self {
        Self
    }

    /// Verifies `document`. Errors never escape: they become [`TrustVerdict::Failed`].
    pub fn verify(&self, document: &TokenScriptDocument) -> TrustVerdict {
        let signatures = document
            .xml()
            .find_all(|element| element.is(DSIG_NS, "Signature"));

        let located = match signatures.as_slice() {
            [] => {
                info!("No XML signature found, skipping signature validation");
                return TrustVerdict::NoSignature;
            }
            [single] => single,
            _ => {
                warn!("Document has {} signature elements", signatures.len());
                return TrustVerdict::failed(VerificationError::MultipleSignatures.to_string());
            }
        };

        match self.verify_block(document.xml(), located) {
            Ok(keys) => {
                info!("XML signature verified, authoritative key {}", keys.authoritative);
                TrustVerdict::Verified(keys)
            }
            Err(e) => {
                warn!("XML signature verification failed: {}", e);
                TrustVerdict::failed(e.to_string())
            }
        }
    }

    fn verify_block(&self, document: &Document, located: &Located<'_>) -> Result<SignerKeys, VerificationError> {
        let block = SignatureBlock::parse(located)?;
        block.check_references(document)?;

        let signer = block.signer_key()?;
        block.check_signature_value(&signer)?;
        debug!("Signature value verified with {}", signer.hex());

        let authoritative = self.authoritative_key(&block.certificates, &signer)?;
        Ok(SignerKeys {
            authoritative: authoritative.hex().to_string(),
            signing: signer.hex().to_string(),
        })
    }

    fn authoritative_key(
        &self,
        certificates: &[String],
        signer: &KeyMaterial,
    ) -> Result<KeyMaterial, VerificationError> {
        match certificates {
            [] => Ok(signer.clone()),
            [single] => {
                let certificate = ParsedCertificate::from_base64(single)?;
                if certificate.subject_key() != signer {
                    return Err(VerificationError::SubjectKeyMismatch);
                }
                let root = certificate
                    .embedded_issuer_key()
                    .map_err(VerificationError::InvalidIssuerKey)?
                    .ok_or(VerificationError::MissingIssuerKey)?;
                if !certificate.is_signed_by(&root) {
                    return Err(VerificationError::SelfVerificationFailed);
                }
                Ok(root)
            }
            chain => {
                let chain = CertificateChain::from_base64_entries(chain)?;
                Ok(CertificateChainResolver::resolve(&chain, signer.hex())?)
            }
        }
    }
}

/// Verifies a TokenScript document with the default verifier.
pub fn verify_signature(document: &TokenScriptDocument) -> TrustVerdict {
    SignatureVerifier::new().verify(document)
}
