// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use tracing::debug;

use crate::domain::agent::AgentId;
use crate::domain::secure_channel::CryptoError;

/// Ed25519 identity keys known to this process.
///
/// Signing keys exist only for identities hosted here (the coordinator itself and,
/// in simulations, in-process agents). Verifying keys exist for every identity whose
/// messages we accept.
#[derive(Default)]
pub struct KeyRing {
    signing: DashMap<AgentId, SigningKey>,
    trusted: DashMap<AgentId, VerifyingKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate (or return the existing) keypair for a locally hosted identity.
    pub fn enroll(&self, identity: &AgentId) -> VerifyingKey {
        let key = self
            .signing
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(identity = %identity, "Generated Ed25519 identity key");
                SigningKey::generate(&mut OsRng)
            })
            .verifying_key();
        self.trusted.insert(identity.clone(), key);
        key
    }

    /// Trust a remote identity's public key.
    pub fn trust(&self, identity: &AgentId, key: VerifyingKey) {
        self.trusted.insert(identity.clone(), key);
    }

    /// Trust a remote identity from raw 32-byte public key material.
    pub fn trust_bytes(&self, identity: &AgentId, public_key: &[u8]) -> Result<(), CryptoError> {
        let bytes: [u8; 32] = public_key.try_into().map_err(|_| {
            CryptoError::SignatureVerificationFailed(
                "Invalid public key length (must be 32 bytes)".to_string(),
            )
        })?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
            CryptoError::SignatureVerificationFailed(format!("Invalid public key: {}", e))
        })?;
        self.trust(identity, key);
        Ok(())
    }

    pub fn forget(&self, identity: &AgentId) {
        self.signing.remove(identity);
        self.trusted.remove(identity);
    }

    pub fn verifying_key(&self, identity: &AgentId) -> Option<VerifyingKey> {
        self.trusted.get(identity).map(|k| *k)
    }

    pub fn can_sign_for(&self, identity: &AgentId) -> bool {
        self.signing.contains_key(identity)
    }

    /// Sign `message` as `identity`, returning a base64 signature.
    pub fn sign(&self, identity: &AgentId, message: &[u8]) -> Result<String, CryptoError> {
        let key = self
            .signing
            .get(identity)
            .ok_or_else(|| CryptoError::MissingSigningKey(identity.clone()))?;
        let signature = key.sign(message);
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// Verify a base64 signature claimed to come from `identity`.
    pub fn verify(&self, identity: &AgentId, message: &[u8], signature: &str) -> Result<(), CryptoError> {
        let verifying_key = self
            .verifying_key(identity)
            .ok_or_else(|| CryptoError::UnknownSigner(identity.clone()))?;

        let decoded = STANDARD.decode(signature).map_err(|e| {
            CryptoError::SignatureVerificationFailed(format!("Invalid base64 signature: {}", e))
        })?;

        let sig_bytes: [u8; 64] = decoded.try_into().map_err(|_| {
            CryptoError::SignatureVerificationFailed(
                "Invalid signature length (must be 64 bytes)".to_string(),
            )
        })?;

        verifying_key
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .map_err(|e| CryptoError::SignatureVerificationFailed(e.to_string()))
    }
}
