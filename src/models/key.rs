// src/models/key.rs
//! Public key material used by signature and certificate verification.
//!
//! Keys are compared by their canonical hex form: `0x` followed by the
//! lowercase hex of the raw uncompressed SEC1 point (ECDSA) or of the
//! SubjectPublicKeyInfo DER (RSA). This matches the keys published in
//! allow-lists and contract metadata.

use crate::utils::encoding::to_hex_prefixed;
use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1v15;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use std::fmt;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::Encode;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

/// `id-ecPublicKey`
pub const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// `secp256k1`
pub const SECP256K1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.10");
/// `rsaEncryption`
pub const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ECDSA/K-256")]
    EcdsaK256,
    #[serde(rename = "RSA")]
    Rsa,
}

/// How a signature value is encoded and which digest it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// ECDSA over SHA-256, `r || s` as used by XML DSig.
    EcdsaSha256Raw,
    /// ECDSA over SHA-256, DER `Ecdsa-Sig-Value` as used by X.509.
    EcdsaSha256Der,
    RsaPkcs1Sha256,
    RsaPkcs1Sha512,
}

#[derive(Clone)]
enum PublicKey {
    EcdsaK256(VerifyingKey),
    Rsa(RsaPublicKey),
}

/// An opaque public key with its algorithm and canonical hex form.
#[derive(Clone)]
pub struct KeyMaterial {
    key: PublicKey,
    hex: String,
}

impl KeyMaterial {
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        let point = k256::PublicKey::from(&key).to_encoded_point(false);
        let hex = to_hex_prefixed(point.as_bytes());
        Self {
            key: PublicKey::EcdsaK256(key),
            hex,
        }
    }

    /// Imports a raw SEC1 secp256k1 point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, String> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self::from_verifying_key)
            .map_err(|e| format!("invalid secp256k1 public key: {}", e))
    }

    pub fn from_rsa(key: RsaPublicKey) -> Result<Self, String> {
        let der = key
            .to_public_key_der()
            .map_err(|e| format!("RSA key export failed: {}", e))?;
        let hex = to_hex_prefixed(der.as_bytes());
        Ok(Self {
            key: PublicKey::Rsa(key),
            hex,
        })
    }

    /// Builds an RSA key from big-endian modulus and exponent bytes.
    pub fn from_rsa_components(modulus: &[u8], exponent: &[u8]) -> Result<Self, String> {
        let key = RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(exponent),
        )
        .map_err(|e| format!("invalid RSA public key: {}", e))?;
        Self::from_rsa(key)
    }

    /// Imports the subject public key of a certificate.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self, String> {
        let oid = spki.algorithm.oid;
        if oid == EC_PUBLIC_KEY_OID {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .ok_or("EC key without curve parameters")?
                .decode_as::<ObjectIdentifier>()
                .map_err(|e| format!("invalid EC curve parameters: {}", e))?;
            if curve != SECP256K1_OID {
                return Err(format!("unsupported EC curve {}", curve));
            }
            Self::from_sec1_bytes(spki.subject_public_key.raw_bytes())
        } else if oid == RSA_ENCRYPTION_OID {
            let der = spki
                .to_der()
                .map_err(|e| format!("SPKI encoding failed: {}", e))?;
            let key = RsaPublicKey::from_public_key_der(&der)
                .map_err(|e| format!("invalid RSA public key: {}", e))?;
            Self::from_rsa(key)
        } else {
            Err(format!("unsupported public key algorithm {}", oid))
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.key {
            PublicKey::EcdsaK256(_) => KeyAlgorithm::EcdsaK256,
            PublicKey::Rsa(_) => KeyAlgorithm::Rsa,
        }
    }

    /// Canonical `0x`-prefixed lowercase hex.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Checks `signature` over `message`.
    ///
    /// High-S ECDSA signatures are normalized before verification. A scheme
    /// that does not match the key algorithm never verifies.
    pub fn verify(&self, scheme: SignatureScheme, message: &[u8], signature: &[u8]) -> bool {
        match (&self.key, scheme) {
            (PublicKey::EcdsaK256(key), SignatureScheme::EcdsaSha256Raw) => {
                EcdsaSignature::from_slice(signature)
                    .map(|sig| verify_ecdsa(key, message, sig))
                    .unwrap_or(false)
            }
            (PublicKey::EcdsaK256(key), SignatureScheme::EcdsaSha256Der) => {
                EcdsaSignature::from_der(signature)
                    .map(|sig| verify_ecdsa(key, message, sig))
                    .unwrap_or(false)
            }
            (PublicKey::Rsa(key), SignatureScheme::RsaPkcs1Sha256) => {
                match pkcs1v15::Signature::try_from(signature) {
                    Ok(sig) => pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                        .verify(message, &sig)
                        .is_ok(),
                    Err(_) => false,
                }
            }
            (PublicKey::Rsa(key), SignatureScheme::RsaPkcs1Sha512) => {
                match pkcs1v15::Signature::try_from(signature) {
                    Ok(sig) => pkcs1v15::VerifyingKey::<Sha512>::new(key.clone())
                        .verify(message, &sig)
                        .is_ok(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

fn verify_ecdsa(key: &VerifyingKey, message: &[u8], signature: EcdsaSignature) -> bool {
    let signature = signature.normalize_s().unwrap_or(signature);
    key.verify(message, &signature).is_ok()
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.hex == other.hex
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &self.algorithm())
            .field("hex", &self.hex)
            .finish()
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}
