//! Resolves a hotkey to the Ed25519 public key needed to verify a
//! receipt's validator signature (spec.md §4.6, "verify signatures").

use async_trait::async_trait;
use compute_validator_common::ids::Hotkey;
use compute_validator_common::signing::PublicKey;

#[async_trait]
pub trait ValidatorKeyResolver: Send + Sync {
    async fn public_key_for(&self, validator: &Hotkey) -> Option<PublicKey>;
}
