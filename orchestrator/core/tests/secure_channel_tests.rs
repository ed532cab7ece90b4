// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Channel bus behaviour with pluggable primitives and two cooperating nodes.

use std::sync::Arc;

use async_trait::async_trait;
use hive_core::application::{ChannelError, MembershipRegistry, SecureChannelBus};
use hive_core::domain::agent::{Agent, AgentId, AgentMetadata, AgentRegistration, Capability};
use hive_core::domain::message::Message;
use hive_core::domain::node_config::{ChannelConfig, RegistryConfig};
use hive_core::domain::secure_channel::{ChannelKey, CryptoError, KeyAgreement};
use hive_core::infrastructure::crypto::KeyRing;
use hive_core::infrastructure::{EventBus, InMemoryTransport};
use serde_json::json;

fn registry_with(peers: &[&str]) -> Arc<MembershipRegistry> {
    let registry = Arc::new(MembershipRegistry::new(RegistryConfig::default(), EventBus::new(64)));
    for peer in peers {
        registry
            .register(AgentRegistration::new(
                *peer,
                vec![Capability::new("relay", "network")],
                AgentMetadata::new(*peer, "integration"),
            ))
            .unwrap();
    }
    registry
}

/// Key agreement that refuses every peer.
struct RefusingAgreement;

#[async_trait]
impl KeyAgreement for RefusingAgreement {
    async fn agree(&self, _local: &AgentId, peer: &Agent) -> Result<ChannelKey, CryptoError> {
        Err(CryptoError::KeyAgreement {
            peer: peer.id.clone(),
            reason: "handshake refused".to_string(),
        })
    }
}

/// Deterministic agreement shared by two nodes so both sides derive the same key.
struct SharedKeyAgreement;

#[async_trait]
impl KeyAgreement for SharedKeyAgreement {
    async fn agree(&self, local: &AgentId, peer: &Agent) -> Result<ChannelKey, CryptoError> {
        let mut ids = [local.as_str(), peer.id.as_str()];
        ids.sort();
        let mut key = [0u8; 32];
        for (i, byte) in ids.concat().bytes().enumerate() {
            key[i % 32] ^= byte;
        }
        Ok(ChannelKey::from_bytes(key))
    }
}

#[tokio::test]
async fn test_failed_key_agreement_becomes_negative_receipt() {
    let registry = registry_with(&["A"]);
    let bus = SecureChannelBus::new(
        AgentId::from("hive"),
        ChannelConfig::default(),
        registry,
        Arc::new(InMemoryTransport::new()),
        EventBus::new(64),
    )
    .with_key_agreement(Arc::new(RefusingAgreement));

    let receipt = bus.send(Message::new("hive", "A", json!({"type": "ping"}))).await;
    assert!(!receipt.delivered);
    assert!(receipt.reason.unwrap().contains("handshake refused"));
    assert_eq!(bus.channel_count(), 0);
    assert!(matches!(
        bus.connect(&AgentId::from("A")).await,
        Err(ChannelError::Crypto(CryptoError::KeyAgreement { .. }))
    ));
}

#[tokio::test]
async fn test_two_nodes_exchange_signed_messages() {
    // Both nodes know each other and trust each other's public identity keys
    let transport = Arc::new(InMemoryTransport::new());
    let north_keys = Arc::new(KeyRing::new());
    let south_keys = Arc::new(KeyRing::new());

    let north = SecureChannelBus::new(
        AgentId::from("north"),
        ChannelConfig::default(),
        registry_with(&["south"]),
        transport.clone(),
        EventBus::new(64),
    )
    .with_keyring(north_keys.clone())
    .with_key_agreement(Arc::new(SharedKeyAgreement));
    let south = SecureChannelBus::new(
        AgentId::from("south"),
        ChannelConfig::default(),
        registry_with(&["north"]),
        transport.clone(),
        EventBus::new(64),
    )
    .with_keyring(south_keys.clone())
    .with_key_agreement(Arc::new(SharedKeyAgreement));

    let north_id = AgentId::from("north");
    let south_id = AgentId::from("south");
    south_keys.trust(&north_id, north_keys.verifying_key(&north_id).unwrap());
    north_keys.trust(&south_id, south_keys.verifying_key(&south_id).unwrap());
    south.connect(&north_id).await.unwrap();

    let payload = json!({"type": "proposal_created", "quorum": 0.66});
    let receipt = north.send(Message::new("north", "south", payload.clone())).await;
    assert!(receipt.delivered);

    let envelopes = transport.take(&south_id);
    assert_eq!(envelopes.len(), 1);
    let received = south.receive(&envelopes[0]).await.unwrap();
    assert_eq!(received.payload, payload);
    assert_eq!(received.sender, north_id);
    assert_eq!(south.metrics().messages_received, 1);

    // A node that does not trust the sender rejects the same envelope
    let stranger = SecureChannelBus::new(
        AgentId::from("south"),
        ChannelConfig::default(),
        registry_with(&["north"]),
        transport,
        EventBus::new(64),
    )
    .with_key_agreement(Arc::new(SharedKeyAgreement));
    stranger.connect(&north_id).await.unwrap();
    assert!(matches!(
        stranger.receive(&envelopes[0]).await,
        Err(ChannelError::Crypto(CryptoError::UnknownSigner(_)))
    ));
    assert_eq!(stranger.metrics().rejected_messages, 1);
}

#[tokio::test]
async fn test_reconnect_after_close_rotates_key() {
    let bus = SecureChannelBus::new(
        AgentId::from("hive"),
        ChannelConfig::default(),
        registry_with(&["A"]),
        Arc::new(InMemoryTransport::new()),
        EventBus::new(64),
    );
    let peer = AgentId::from("A");

    let first = bus.connect(&peer).await.unwrap();
    assert!(bus.close(&peer));
    let second = bus.connect(&peer).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.key(), second.key());
}
