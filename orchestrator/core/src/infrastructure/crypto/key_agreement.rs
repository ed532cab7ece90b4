// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::secure_channel::{ChannelKey, CryptoError, KeyAgreement, CHANNEL_KEY_LEN};

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 32;
const DOMAIN_LABEL: &[u8] = b"hive/channel-key/v1";

/// Derives channel keys from a node-local secret.
///
/// `key = HMAC-SHA256(node_secret, label || salt || len(local) || local || len(peer) || peer)`
/// with a fresh random salt per call, so every established channel gets its own key
/// even when a peer reconnects.
pub struct HmacKeyAgreement {
    node_secret: [u8; 32],
}

impl HmacKeyAgreement {
    pub fn new(node_secret: [u8; 32]) -> Self {
        Self { node_secret }
    }

    /// Generate a random node secret.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(secret)
    }

    fn derive(&self, local: &AgentId, peer: &AgentId, salt: &[u8]) -> Result<ChannelKey, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.node_secret).map_err(|e| {
            CryptoError::KeyAgreement {
                peer: peer.clone(),
                reason: e.to_string(),
            }
        })?;
        mac.update(DOMAIN_LABEL);
        mac.update(salt);
        for id in [local, peer] {
            mac.update(&(id.0.len() as u64).to_be_bytes());
            mac.update(id.0.as_bytes());
        }

        let digest = mac.finalize().into_bytes();
        let mut key = [0u8; CHANNEL_KEY_LEN];
        key.copy_from_slice(&digest[..CHANNEL_KEY_LEN]);
        Ok(ChannelKey::from_bytes(key))
    }
}

impl std::fmt::Debug for HmacKeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKeyAgreement").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyAgreement for HmacKeyAgreement {
    async fn agree(&self, local: &AgentId, peer: &Agent) -> Result<ChannelKey, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        self.derive(local, &peer.id, &salt)
    }
}
