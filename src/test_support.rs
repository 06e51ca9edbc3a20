// src/test_support.rs
//! Fixtures for unit tests: deterministic keys, certificates and signed
//! TokenScript documents.

use crate::models::document::TokenScriptDocument;
use crate::utils::encoding::encode_base64;
use crate::xml::c14n::{canonicalize_document, canonicalize_subtree, C14nMethod, EXC_C14N};
use crate::xml::dom::Document;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::EncodePublicKey;
use rsa::signature::SignatureEncoding;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::der::asn1::{BitString, OctetString};
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::security::certificate::{ECDSA_WITH_SHA256_OID, ISSUER_ALT_NAME_OID};

const DIGEST_PLACEHOLDER: &str = "{DIGEST}";
const SIGNATURE_PLACEHOLDER: &str = "{SIGNATURE}";

/// Deterministic secp256k1 key derived from a one-byte seed.
pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub(crate) fn uncompressed_point(key: &SigningKey) -> Vec<u8> {
    k256::PublicKey::from(key.verifying_key())
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

pub(crate) struct CertTemplate<'a> {
    subject: &'a str,
    key: &'a SigningKey,
    issuer: &'a str,
    issuer_key: &'a SigningKey,
    embedded: Option<Vec<u8>>,
}

impl<'a> CertTemplate<'a> {
    pub(crate) fn self_signed(subject: &'a str, key: &'a SigningKey) -> Self {
        Self::issued(subject, key, subject, key)
    }

    pub(crate) fn issued(
        subject: &'a str,
        key: &'a SigningKey,
        issuer: &'a str,
        issuer_key: &'a SigningKey,
    ) -> Self {
        Self {
            subject,
            key,
            issuer,
            issuer_key,
            embedded: None,
        }
    }

    /// Stores `root` as the raw issuerAltName public key.
    pub(crate) fn with_issuer_key(self, root: &SigningKey) -> Self {
        self.with_raw_extension(uncompressed_point(root))
    }

    pub(crate) fn with_raw_extension(mut self, bytes: Vec<u8>) -> Self {
        self.embedded = Some(bytes);
        self
    }
}

/// DER certificate signed with ecdsa-with-SHA256 by the template's issuer key.
pub(crate) fn certificate(cert: CertTemplate<'_>) -> Vec<u8> {
    let spki_der = cert.key.verifying_key().to_public_key_der().unwrap();
    let algorithm = AlgorithmIdentifierOwned {
        oid: ECDSA_WITH_SHA256_OID,
        parameters: None,
    };
    let extensions = cert.embedded.map(|bytes| {
        vec![Extension {
            extn_id: ISSUER_ALT_NAME_OID,
            critical: false,
            extn_value: OctetString::new(bytes).unwrap(),
        }]
    });
    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[1]).unwrap(),
        signature: algorithm.clone(),
        issuer: Name::from_str(cert.issuer).unwrap(),
        validity: Validity::from_now(Duration::from_secs(3600)).unwrap(),
        subject: Name::from_str(cert.subject).unwrap(),
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions,
    };
    let signature: Signature = cert.issuer_key.sign(&tbs_certificate.to_der().unwrap());
    Certificate {
        tbs_certificate,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(signature.to_der().as_bytes()).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// `KeyValue` with a dsig11 ECKeyValue on secp256k1.
pub(crate) fn ec_key_value(key: &SigningKey) -> String {
    format!(
        "<ds:KeyValue><dsig11:ECKeyValue xmlns:dsig11=\"http://www.w3.org/2009/xmldsig11#\">\
         <dsig11:NamedCurve URI=\"urn:oid:1.3.132.0.10\"/>\
         <dsig11:PublicKey>{}</dsig11:PublicKey></dsig11:ECKeyValue></ds:KeyValue>",
        encode_base64(&uncompressed_point(key))
    )
}

pub(crate) fn rsa_key_value(key: &RsaPrivateKey) -> String {
    format!(
        "<ds:KeyValue><ds:RSAKeyValue><ds:Modulus>{}</ds:Modulus>\
         <ds:Exponent>{}</ds:Exponent></ds:RSAKeyValue></ds:KeyValue>",
        encode_base64(&key.n().to_bytes_be()),
        encode_base64(&key.e().to_bytes_be())
    )
}

pub(crate) fn x509_data(certificates: &[Vec<u8>]) -> String {
    let entries: String = certificates
        .iter()
        .map(|der| format!("<ds:X509Certificate>{}</ds:X509Certificate>", encode_base64(der)))
        .collect();
    format!("<ds:X509Data>{}</ds:X509Data>", entries)
}

pub(crate) enum TestSigner<'a> {
    Ecdsa(&'a SigningKey),
    Rsa(&'a RsaPrivateKey),
}

impl TestSigner<'_> {
    fn method_uri(&self) -> &'static str {
        match self {
            TestSigner::Ecdsa(_) => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
            TestSigner::Rsa(_) => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            TestSigner::Ecdsa(key) => {
                let signature: Signature = key.sign(message);
                signature.to_bytes().to_vec()
            }
            TestSigner::Rsa(key) => rsa::pkcs1v15::SigningKey::<Sha256>::new((*key).clone())
                .sign(message)
                .to_vec(),
        }
    }
}

/// An enveloped, exclusive-c14n signed TokenScript around `body`.
pub(crate) fn signed_xml(body: &str, signer: TestSigner<'_>, key_info: &str) -> String {
    let template = format!(
        "<ts:token xmlns:ts=\"http://tokenscript.org/2024/01/tokenscript\" name=\"Fixture\">\n\
         {body}\n\
         <ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">\
         <ds:SignedInfo>\
         <ds:CanonicalizationMethod Algorithm=\"{exc}\"/>\
         <ds:SignatureMethod Algorithm=\"{method}\"/>\
         <ds:Reference URI=\"\">\
         <ds:Transforms>\
         <ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>\
         <ds:Transform Algorithm=\"{exc}\"/>\
         </ds:Transforms>\
         <ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
         <ds:DigestValue>{DIGEST_PLACEHOLDER}</ds:DigestValue>\
         </ds:Reference>\
         </ds:SignedInfo>\
         <ds:SignatureValue>{SIGNATURE_PLACEHOLDER}</ds:SignatureValue>\
         <ds:KeyInfo>{key_info}</ds:KeyInfo>\
         </ds:Signature>\n\
         </ts:token>",
        body = body,
        exc = EXC_C14N,
        method = signer.method_uri(),
        key_info = key_info,
        DIGEST_PLACEHOLDER = DIGEST_PLACEHOLDER,
        SIGNATURE_PLACEHOLDER = SIGNATURE_PLACEHOLDER,
    );
    let method = C14nMethod::from_uri(EXC_C14N).unwrap();

    let document = Document::parse(&template).unwrap();
    let signature = document
        .root
        .child("http://www.w3.org/2000/09/xmldsig#", "Signature")
        .unwrap();
    let canonical = canonicalize_document(&document, &method, Some(signature));
    let digest = encode_base64(&Sha256::digest(canonical.as_bytes()));
    let with_digest = template.replace(DIGEST_PLACEHOLDER, &digest);

    let document = Document::parse(&with_digest).unwrap();
    let signed_info = document
        .root()
        .child("http://www.w3.org/2000/09/xmldsig#", "Signature")
        .and_then(|signature| signature.child("http://www.w3.org/2000/09/xmldsig#", "SignedInfo"))
        .unwrap();
    let canonical_signed_info = canonicalize_subtree(&signed_info, &method, None);
    let signature_value = encode_base64(&signer.sign(canonical_signed_info.as_bytes()));

    with_digest.replace(SIGNATURE_PLACEHOLDER, &signature_value)
}

pub(crate) fn signed_document(body: &str, signer: TestSigner<'_>, key_info: &str) -> TokenScriptDocument {
    TokenScriptDocument::parse(&signed_xml(body, signer, key_info)).unwrap()
}

/// A small RSA key for signature tests.
pub(crate) fn rsa_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
}

/// A [`MessageTarget`](crate::rpc::transport::MessageTarget) remembering every post.
#[derive(Default)]
pub(crate) struct RecordingTarget {
    posted: std::sync::Mutex<Vec<(serde_json::Value, String)>>,
}

impl RecordingTarget {
    pub(crate) fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub(crate) fn messages(&self) -> Vec<serde_json::Value> {
        self.posted.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub(crate) fn last(&self) -> Option<serde_json::Value> {
        self.posted.lock().unwrap().last().map(|(m, _)| m.clone())
    }

    pub(crate) fn last_origin(&self) -> Option<String> {
        self.posted.lock().unwrap().last().map(|(_, o)| o.clone())
    }

    pub(crate) fn clear(&self) {
        self.posted.lock().unwrap().clear();
    }
}

impl crate::rpc::transport::MessageTarget for RecordingTarget {
    fn post_message(&self, message: serde_json::Value, target_origin: &str) {
        self.posted
            .lock()
            .unwrap()
            .push((message, target_origin.to_string()));
    }
}
