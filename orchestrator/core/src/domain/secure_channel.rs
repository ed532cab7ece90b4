// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secure Channel Contracts (SEAL)
//!
//! Domain-level abstractions over the cryptography of the channel bus. The
//! bus only depends on these traits; the default implementations live in
//! [`crate::infrastructure::crypto`].
//!
//! ## Required Guarantees
//!
//! Whatever primitive is plugged in:
//!
//! - [`KeyAgreement::agree`] **must** return a distinct key for every channel.
//!   Two peers never share a key.
//! - [`PayloadCipher::decrypt`] **must** authenticate the ciphertext and fail on
//!   any modification.
//! - Signature verification fails closed: no cleartext is produced for a
//!   message whose signature does not cover its exact ciphertext.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::agent::{Agent, AgentId};

pub const CHANNEL_KEY_LEN: usize = 32;

/// Symmetric key bound to one channel for the channel's lifetime.
#[derive(Clone)]
pub struct ChannelKey([u8; CHANNEL_KEY_LEN]);

impl ChannelKey {
    pub fn from_bytes(bytes: [u8; CHANNEL_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHANNEL_KEY_LEN] {
        &self.0
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl PartialEq for ChannelKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for ChannelKey {}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChannelKey({})", self.fingerprint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Key agreement with {peer} failed: {reason}")]
    KeyAgreement { peer: AgentId, reason: String },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Ciphertext failed authentication or was malformed
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("No signing key held for {0}")]
    MissingSigningKey(AgentId),

    #[error("No verifying key trusted for {0}")]
    UnknownSigner(AgentId),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),
}

/// Derives the per-channel symmetric key when a channel is established.
#[async_trait]
pub trait KeyAgreement: Send + Sync {
    async fn agree(&self, local: &AgentId, peer: &Agent) -> Result<ChannelKey, CryptoError>;
}

/// Authenticated encryption of message payloads.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, key: &ChannelKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_debug_is_redacted() {
        let key = ChannelKey::from_bytes([7u8; CHANNEL_KEY_LEN]);
        let debug = format!("{:?}", key);
        assert!(debug.starts_with("ChannelKey("));
        assert!(!debug.contains("7, 7"));
        assert_eq!(key.fingerprint().len(), 16);
    }

    #[test]
    fn test_channel_key_equality() {
        let a = ChannelKey::from_bytes([1u8; CHANNEL_KEY_LEN]);
        let mut other = [1u8; CHANNEL_KEY_LEN];
        other[31] = 2;
        let b = ChannelKey::from_bytes(other);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
