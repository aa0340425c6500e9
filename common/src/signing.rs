//! Signing oracle: the validator's hotkey signer. We consume signatures, we
//! don't design the crypto (spec.md §1 non-goal): this wraps a single
//! Ed25519 keypair the way the teacher's discovery-protocol identity does
//! (`crypto::ed25519`), zeroized on drop.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_bytes_32")] [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(hex_str).map_err(|_| SigningError::InvalidPublicKey)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| SigningError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_bytes_64")] [u8; 64]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Anything that can sign bytes with the validator's identity and verify a
/// third party's signature against a known public key. Swappable for a
/// remote signer without touching callers.
pub trait SigningOracle: Send + Sync {
    fn public_key(&self) -> PublicKey;
    fn sign(&self, message: &[u8]) -> Signature;
    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool;
}

/// Ed25519-backed signing oracle holding the validator's secret key.
pub struct Ed25519SigningOracle {
    signing_key: Zeroizing<[u8; 32]>,
    verifying_key: VerifyingKey,
}

impl Ed25519SigningOracle {
    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Self, SigningError> {
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key: Zeroizing::new(secret),
            verifying_key,
        })
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key: Zeroizing::new(signing_key.to_bytes()),
            verifying_key,
        }
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.signing_key)
    }
}

impl SigningOracle for Ed25519SigningOracle {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key.to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key().sign(message);
        Signature(sig.to_bytes())
    }

    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        vk.verify(message, &sig).is_ok()
    }
}

mod hex_bytes_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod hex_bytes_64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let oracle = Ed25519SigningOracle::generate();
        let msg = b"job-started-receipt-payload";
        let sig = oracle.sign(msg);
        assert!(oracle.verify(msg, &sig, &oracle.public_key()));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let oracle = Ed25519SigningOracle::generate();
        let sig = oracle.sign(b"original payload");
        assert!(!oracle.verify(b"tampered payload", &sig, &oracle.public_key()));
    }

    #[test]
    fn public_key_round_trips_through_hex() {
        let oracle = Ed25519SigningOracle::generate();
        let hex = oracle.public_key().to_hex();
        assert_eq!(PublicKey::from_hex(&hex).unwrap(), oracle.public_key());
    }

    #[test]
    fn wrong_public_key_fails_verification() {
        let oracle = Ed25519SigningOracle::generate();
        let other = Ed25519SigningOracle::generate();
        let sig = oracle.sign(b"payload");
        assert!(!oracle.verify(b"payload", &sig, &other.public_key()));
    }
}
