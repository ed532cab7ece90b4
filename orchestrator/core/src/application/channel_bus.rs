// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Secure Channel Bus
//!
//! Point-to-point and broadcast messaging over authenticated, encrypted
//! channels. Every higher protocol (allocation, consensus, funding) rides on it.
//!
//! # Send path
//!
//! ```text
//! connect(peer) ─▶ encrypt(payload) ─▶ sign(envelope) ─▶ enqueue ─▶ transmit ─▶ receipt
//! ```
//!
//! Any failure along the path becomes a negative [`DeliveryReceipt`]; `send`
//! never returns an error. Envelopes are transmitted in enqueue order per
//! channel. There is no ordering across channels.
//!
//! # Receive path
//!
//! TTL check, then signature verification over the full ciphertext, then
//! decryption. Verification fails closed: a rejected envelope never yields
//! cleartext.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::background::spawn_periodic;
use crate::application::registry::MembershipRegistry;
use crate::domain::agent::AgentId;
use crate::domain::events::{ChannelEvent, CloseReason};
use crate::domain::message::{DeliveryReceipt, Message, MessageId, SealedMessage};
use crate::domain::node_config::ChannelConfig;
use crate::domain::secure_channel::{ChannelKey, CryptoError, KeyAgreement, PayloadCipher};
use crate::infrastructure::crypto::{AesGcmCipher, HmacKeyAgreement, KeyRing};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::transport::{MessageTransport, TransportError};

pub const PROTOCOL_VERSION: &str = "hive-seal/1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Peer {0} not found in membership registry")]
    PeerNotFound(AgentId),

    #[error("No channel established with {0}")]
    ChannelNotFound(AgentId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{operation} with {peer} timed out")]
    Timeout { peer: AgentId, operation: &'static str },

    #[error("Message {0} expired before it was received")]
    Expired(MessageId),

    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

/// An authenticated conduit to one peer.
pub struct SecureChannel {
    peer: AgentId,
    key: ChannelKey,
    protocol_version: &'static str,
    authenticated: bool,
    established_at: DateTime<Utc>,
    last_activity: parking_lot::Mutex<DateTime<Utc>>,
    outbound: tokio::sync::Mutex<VecDeque<SealedMessage>>,
}

impl SecureChannel {
    fn new(peer: AgentId, key: ChannelKey, now: DateTime<Utc>) -> Self {
        Self {
            peer,
            key,
            protocol_version: PROTOCOL_VERSION,
            authenticated: true,
            established_at: now,
            last_activity: parking_lot::Mutex::new(now),
            outbound: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub fn peer(&self) -> &AgentId {
        &self.peer
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn key_fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    pub fn protocol_version(&self) -> &str {
        self.protocol_version
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    fn touch(&self, now: DateTime<Utc>) {
        let mut last = self.last_activity.lock();
        if now > *last {
            *last = now;
        }
    }

    /// Envelopes waiting for transmission.
    pub async fn queued(&self) -> usize {
        self.outbound.lock().await.len()
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("peer", &self.peer)
            .field("key", &self.key)
            .field("protocol_version", &self.protocol_version)
            .field("authenticated", &self.authenticated)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct BusMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_transferred: AtomicU64,
    failed_deliveries: AtomicU64,
    rejected_messages: AtomicU64,
    /// (running average in ms, sample count)
    latency: parking_lot::Mutex<(f64, u64)>,
}

impl BusMetrics {
    fn record_latency(&self, latency_ms: f64) {
        let mut latency = self.latency.lock();
        latency.1 += 1;
        latency.0 += (latency_ms - latency.0) / latency.1 as f64;
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_transferred: u64,
    pub failed_deliveries: u64,
    pub rejected_messages: u64,
    pub active_channels: usize,
    pub average_latency_ms: f64,
}

pub struct SecureChannelBus {
    local_identity: AgentId,
    registry: Arc<MembershipRegistry>,
    keyring: Arc<KeyRing>,
    key_agreement: Arc<dyn KeyAgreement>,
    cipher: Arc<dyn PayloadCipher>,
    transport: Arc<dyn MessageTransport>,
    channels: DashMap<AgentId, Arc<SecureChannel>>,
    metrics: BusMetrics,
    event_bus: EventBus,
    inbound: broadcast::Sender<Message>,
    config: ChannelConfig,
}

impl SecureChannelBus {
    /// Bus with the default primitives: HMAC-SHA256 key agreement, AES-256-GCM
    /// and a fresh Ed25519 identity for `local_identity`.
    pub fn new(
        local_identity: AgentId,
        config: ChannelConfig,
        registry: Arc<MembershipRegistry>,
        transport: Arc<dyn MessageTransport>,
        event_bus: EventBus,
    ) -> Self {
        let keyring = Arc::new(KeyRing::new());
        keyring.enroll(&local_identity);
        let (inbound, _) = broadcast::channel(config.inbound_capacity.max(1));

        Self {
            local_identity,
            registry,
            keyring,
            key_agreement: Arc::new(HmacKeyAgreement::generate()),
            cipher: Arc::new(AesGcmCipher::new()),
            transport,
            channels: DashMap::new(),
            metrics: BusMetrics::default(),
            event_bus,
            inbound,
            config,
        }
    }

    pub fn with_key_agreement(mut self, key_agreement: Arc<dyn KeyAgreement>) -> Self {
        self.key_agreement = key_agreement;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn PayloadCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Share an existing key ring. The local identity is enrolled in it.
    pub fn with_keyring(mut self, keyring: Arc<KeyRing>) -> Self {
        keyring.enroll(&self.local_identity);
        self.keyring = keyring;
        self
    }

    pub fn local_identity(&self) -> &AgentId {
        &self.local_identity
    }

    pub fn keyring(&self) -> &Arc<KeyRing> {
        &self.keyring
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The party on the other end of a message, from this node's point of view.
    fn counterparty<'a>(&self, sender: &'a AgentId, recipient: &'a AgentId) -> &'a AgentId {
        if sender == &self.local_identity {
            recipient
        } else {
            sender
        }
    }

    /// Return the channel to `peer`, establishing it on first use.
    pub async fn connect(&self, peer: &AgentId) -> Result<Arc<SecureChannel>, ChannelError> {
        if let Some(channel) = self.channels.get(peer) {
            return Ok(channel.clone());
        }

        let agent = self
            .registry
            .get(peer)
            .ok_or_else(|| ChannelError::PeerNotFound(peer.clone()))?;

        let key = timeout(
            self.config.handshake_timeout,
            self.key_agreement.agree(&self.local_identity, &agent),
        )
        .await
        .map_err(|_| ChannelError::Timeout {
            peer: peer.clone(),
            operation: "key agreement",
        })??;

        let now = Utc::now();
        let candidate = Arc::new(SecureChannel::new(peer.clone(), key, now));

        // A concurrent connect may have won the race; keep the first channel
        let (channel, created) = match self.channels.entry(peer.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                (candidate, true)
            }
        };

        if created {
            gauge!("hive_active_channels").set(self.channels.len() as f64);
            info!(
                peer = %peer,
                key_fingerprint = %channel.key_fingerprint(),
                "Secure channel established"
            );
            self.event_bus.publish_channel_event(ChannelEvent::ChannelEstablished {
                peer: peer.clone(),
                key_fingerprint: channel.key_fingerprint(),
                established_at: now,
            });
        }
        Ok(channel)
    }

    pub fn channel(&self, peer: &AgentId) -> Option<Arc<SecureChannel>> {
        self.channels.get(peer).map(|c| c.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Encrypt and sign `message` over the channel to its counterparty,
    /// establishing the channel if needed. The sender's signing key must be
    /// held by this node's key ring.
    pub async fn seal(&self, message: &Message) -> Result<SealedMessage, ChannelError> {
        let peer = self.counterparty(&message.sender, &message.recipient);
        let channel = self.connect(peer).await?;
        self.seal_with(&channel, message)
    }

    fn seal_with(&self, channel: &SecureChannel, message: &Message) -> Result<SealedMessage, ChannelError> {
        let plaintext = serde_json::to_vec(&message.payload).map_err(|e| ChannelError::Encoding(e.to_string()))?;
        let ciphertext = self.cipher.encrypt(channel.key(), &plaintext)?;

        let mut sealed = SealedMessage {
            id: message.id,
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            ciphertext,
            timestamp: message.timestamp,
            ttl_ms: message.ttl_ms,
            signature: String::new(),
        };
        sealed.signature = self.keyring.sign(&message.sender, &sealed.signing_input())?;
        Ok(sealed)
    }

    /// Verify and decrypt without touching channel state or metrics.
    pub fn open(&self, sealed: &SealedMessage) -> Result<Message, ChannelError> {
        let peer = self.counterparty(&sealed.sender, &sealed.recipient);
        let channel = self
            .channel(peer)
            .ok_or_else(|| ChannelError::ChannelNotFound(peer.clone()))?;

        self.keyring
            .verify(&sealed.sender, &sealed.signing_input(), &sealed.signature)?;
        let plaintext = self.cipher.decrypt(channel.key(), &sealed.ciphertext)?;
        let payload = serde_json::from_slice(&plaintext).map_err(|e| ChannelError::Encoding(e.to_string()))?;

        Ok(Message {
            id: sealed.id,
            sender: sealed.sender.clone(),
            recipient: sealed.recipient.clone(),
            payload,
            timestamp: sealed.timestamp,
            ttl_ms: sealed.ttl_ms,
            signature: Some(sealed.signature.clone()),
        })
    }

    /// Deliver one message. Failures are reported in the receipt.
    pub async fn send(&self, message: Message) -> DeliveryReceipt {
        let message_id = message.id;
        let recipient = message.recipient.clone();

        match self.try_send(&message).await {
            Ok(bytes) => {
                self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .bytes_transferred
                    .fetch_add(bytes as u64, Ordering::Relaxed);
                counter!("hive_messages_sent_total").increment(1);
                counter!("hive_bytes_transferred_total").increment(bytes as u64);
                debug!(
                    message_id = %message_id,
                    recipient = %recipient,
                    message_type = message.message_type().unwrap_or("unknown"),
                    bytes,
                    "Message delivered"
                );
                DeliveryReceipt {
                    message_id,
                    recipient,
                    delivered: true,
                    bytes,
                    reason: None,
                    at: Utc::now(),
                }
            }
            Err(e) => {
                let now = Utc::now();
                self.metrics.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                counter!("hive_delivery_failures_total").increment(1);
                warn!(message_id = %message_id, recipient = %recipient, error = %e, "Message delivery failed");
                self.event_bus.publish_channel_event(ChannelEvent::DeliveryFailed {
                    peer: recipient.clone(),
                    reason: e.to_string(),
                    failed_at: now,
                });
                DeliveryReceipt {
                    message_id,
                    recipient,
                    delivered: false,
                    bytes: 0,
                    reason: Some(e.to_string()),
                    at: now,
                }
            }
        }
    }

    async fn try_send(&self, message: &Message) -> Result<usize, ChannelError> {
        let peer = self.counterparty(&message.sender, &message.recipient);
        let channel = self.connect(peer).await?;
        let sealed = self.seal_with(&channel, message)?;
        let bytes = sealed.ciphertext.len();

        // Holding the queue lock across transmission keeps the channel FIFO
        let mut queue = channel.outbound.lock().await;
        queue.push_back(sealed);
        while let Some(envelope) = queue.front() {
            let outcome = timeout(self.config.delivery_timeout, self.transport.transmit(envelope)).await;
            let envelope = queue.pop_front();
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(ChannelError::Timeout {
                        peer: envelope.map(|e| e.recipient).unwrap_or_else(|| peer.clone()),
                        operation: "delivery",
                    })
                }
            }
        }
        drop(queue);

        channel.touch(Utc::now());
        Ok(bytes)
    }

    /// Send to every recipient independently. One failure never aborts the batch.
    pub async fn broadcast(&self, message: &Message, recipients: &[AgentId]) -> Vec<DeliveryReceipt> {
        join_all(
            recipients
                .iter()
                .map(|recipient| self.send(message.readdressed(recipient))),
        )
        .await
    }

    pub async fn receive(&self, sealed: &SealedMessage) -> Result<Message, ChannelError> {
        self.receive_at(sealed, Utc::now())
    }

    /// Accept an inbound envelope observed at `now`.
    ///
    /// On success the channel's activity clock and the latency average are
    /// updated and the cleartext message is published to inbound subscribers.
    pub fn receive_at(&self, sealed: &SealedMessage, now: DateTime<Utc>) -> Result<Message, ChannelError> {
        let opened = if sealed.is_expired(now) {
            Err(ChannelError::Expired(sealed.id))
        } else {
            self.open(sealed)
        };

        let message = match opened {
            Ok(message) => message,
            Err(e) => {
                self.metrics.rejected_messages.fetch_add(1, Ordering::Relaxed);
                counter!("hive_messages_rejected_total").increment(1);
                warn!(message_id = %sealed.id, sender = %sealed.sender, error = %e, "Rejected inbound message");
                self.event_bus.publish_channel_event(ChannelEvent::MessageRejected {
                    sender: sealed.sender.clone(),
                    reason: e.to_string(),
                    rejected_at: now,
                });
                return Err(e);
            }
        };

        if let Some(channel) = self.channel(self.counterparty(&sealed.sender, &sealed.recipient)) {
            channel.touch(now);
        }

        let latency_ms = (now - sealed.timestamp).num_milliseconds().max(0) as f64;
        self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_latency(latency_ms);
        counter!("hive_messages_received_total").increment(1);
        histogram!("hive_message_latency_ms").record(latency_ms);
        debug!(
            message_id = %message.id,
            sender = %message.sender,
            message_type = message.message_type().unwrap_or("unknown"),
            latency_ms,
            "Message received"
        );

        // No subscribers is fine; the message is still returned to the caller
        let _ = self.inbound.send(message.clone());
        Ok(message)
    }

    /// Stream of verified inbound messages.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<Message> {
        self.inbound.subscribe()
    }

    /// Close the channel to `peer`. Returns false if there was none.
    pub fn close(&self, peer: &AgentId) -> bool {
        self.close_with(peer, CloseReason::Explicit)
    }

    fn close_with(&self, peer: &AgentId, reason: CloseReason) -> bool {
        if self.channels.remove(peer).is_none() {
            return false;
        }
        gauge!("hive_active_channels").set(self.channels.len() as f64);
        info!(peer = %peer, reason = ?reason, "Secure channel closed");
        self.event_bus.publish_channel_event(ChannelEvent::ChannelClosed {
            peer: peer.clone(),
            reason,
            closed_at: Utc::now(),
        });
        true
    }

    pub fn sweep_idle_channels(&self) -> Vec<AgentId> {
        self.sweep_idle_channels_at(Utc::now())
    }

    /// Close every channel idle for longer than `heartbeat_interval * idle_multiplier`.
    pub fn sweep_idle_channels_at(&self, now: DateTime<Utc>) -> Vec<AgentId> {
        let idle_ms = i64::try_from(self.config.idle_timeout().as_millis()).unwrap_or(i64::MAX);
        let is_idle = |channel: &SecureChannel| (now - channel.last_activity()).num_milliseconds() > idle_ms;

        let candidates: Vec<AgentId> = self
            .channels
            .iter()
            .filter(|c| is_idle(c.value()))
            .map(|c| c.key().clone())
            .collect();

        let mut closed = Vec::new();
        for peer in candidates {
            // Activity may have arrived since the scan
            if self.channels.remove_if(&peer, |_, c| is_idle(c)).is_some() {
                warn!(peer = %peer, "Closing idle secure channel");
                self.event_bus.publish_channel_event(ChannelEvent::ChannelClosed {
                    peer: peer.clone(),
                    reason: CloseReason::IdleTimeout,
                    closed_at: now,
                });
                closed.push(peer);
            }
        }
        if !closed.is_empty() {
            gauge!("hive_active_channels").set(self.channels.len() as f64);
        }
        closed
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            messages_sent: self.metrics.messages_sent.load(Ordering::Relaxed),
            messages_received: self.metrics.messages_received.load(Ordering::Relaxed),
            bytes_transferred: self.metrics.bytes_transferred.load(Ordering::Relaxed),
            failed_deliveries: self.metrics.failed_deliveries.load(Ordering::Relaxed),
            rejected_messages: self.metrics.rejected_messages.load(Ordering::Relaxed),
            active_channels: self.channels.len(),
            average_latency_ms: self.metrics.latency.lock().0,
        }
    }

    /// Run the idle-channel sweep every channel `heartbeat_interval` until `shutdown` fires.
    pub fn spawn_liveness_monitor(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.heartbeat_interval;
        spawn_periodic("channel-liveness", period, shutdown, move || {
            let bus = self.clone();
            async move {
                bus.sweep_idle_channels();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentMetadata, AgentRegistration, Capability};
    use crate::domain::node_config::RegistryConfig;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::transport::InMemoryTransport;
    use serde_json::json;

    struct Fixture {
        bus: SecureChannelBus,
        transport: Arc<InMemoryTransport>,
        events: EventBus,
    }

    fn fixture(peers: &[&str]) -> Fixture {
        let events = EventBus::new(256);
        let registry = Arc::new(MembershipRegistry::new(RegistryConfig::default(), events.clone()));
        for peer in peers {
            registry
                .register(AgentRegistration::new(
                    *peer,
                    vec![Capability::new("nlp", "language")],
                    AgentMetadata::new(*peer, "tests"),
                ))
                .unwrap();
        }
        let transport = Arc::new(InMemoryTransport::new());
        let bus = SecureChannelBus::new(
            AgentId::from("hive"),
            ChannelConfig::default(),
            registry,
            transport.clone(),
            events.clone(),
        );
        Fixture { bus, transport, events }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let f = fixture(&["A"]);
        let first = f.bus.connect(&AgentId::from("A")).await.unwrap();
        let second = f.bus.connect(&AgentId::from("A")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_authenticated());
        assert_eq!(first.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(f.bus.channel_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_peers_get_distinct_keys() {
        let f = fixture(&["A", "B"]);
        let a = f.bus.connect(&AgentId::from("A")).await.unwrap();
        let b = f.bus.connect(&AgentId::from("B")).await.unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn test_connect_unknown_peer() {
        let f = fixture(&[]);
        assert_eq!(
            f.bus.connect(&AgentId::from("ghost")).await.unwrap_err(),
            ChannelError::PeerNotFound(AgentId::from("ghost"))
        );
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_yields_negative_receipt() {
        let f = fixture(&[]);
        let mut events = f.events.subscribe();

        let receipt = f
            .bus
            .send(Message::new("hive", "ghost", json!({"type": "ping"})))
            .await;

        assert!(!receipt.delivered);
        assert!(receipt.reason.unwrap().contains("ghost"));
        let metrics = f.bus.metrics();
        assert_eq!(metrics.failed_deliveries, 1);
        assert_eq!(metrics.messages_sent, 0);
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, DomainEvent::Channel(ChannelEvent::DeliveryFailed { .. }))));
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let f = fixture(&["A"]);
        let payload = json!({"type": "task_offer", "nested": {"values": [1, 2, 3]}});

        let receipt = f
            .bus
            .send(Message::new("hive", "A", payload.clone()))
            .await;
        assert!(receipt.delivered);
        assert!(receipt.bytes > 0);

        let delivered = f.transport.take(&AgentId::from("A"));
        assert_eq!(delivered.len(), 1);
        assert_ne!(delivered[0].ciphertext, serde_json::to_vec(&payload).unwrap());

        let opened = f.bus.open(&delivered[0]).unwrap();
        assert_eq!(opened.payload, payload);
        assert_eq!(opened.id, receipt.message_id);

        let metrics = f.bus.metrics();
        assert_eq!(metrics.messages_sent, 1);
        assert_eq!(metrics.bytes_transferred, receipt.bytes as u64);
        assert_eq!(metrics.active_channels, 1);
    }

    #[tokio::test]
    async fn test_per_channel_fifo() {
        let f = fixture(&["A"]);
        for i in 0..5 {
            f.bus
                .send(Message::new("hive", "A", json!({"type": "seq", "n": i})))
                .await;
        }
        let order: Vec<i64> = f
            .transport
            .take(&AgentId::from("A"))
            .iter()
            .map(|e| f.bus.open(e).unwrap().payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_broadcast_settles_all() {
        let f = fixture(&["A", "B"]);
        f.transport.set_unreachable(&AgentId::from("B"), true);

        let receipts = f
            .bus
            .broadcast(
                &Message::new("hive", "", json!({"type": "task_offer"})),
                &[AgentId::from("A"), AgentId::from("B"), AgentId::from("ghost")],
            )
            .await;

        let delivered: Vec<bool> = receipts.iter().map(|r| r.delivered).collect();
        assert_eq!(delivered, vec![true, false, false]);
        assert_eq!(f.transport.pending(&AgentId::from("A")), 1);
        assert_eq!(f.bus.metrics().failed_deliveries, 2);
        // Each copy is its own message
        assert_ne!(receipts[0].message_id, receipts[1].message_id);
    }

    #[tokio::test]
    async fn test_receive_verifies_and_decrypts() {
        let f = fixture(&["A"]);
        let agent = AgentId::from("A");
        f.bus.keyring().enroll(&agent);
        let mut inbound = f.bus.subscribe_inbound();

        let original = Message::new("A", "hive", json!({"type": "task_acceptance", "x": 1}));
        let sealed = f.bus.seal(&original).await.unwrap();

        let received = f.bus.receive(&sealed).await.unwrap();
        assert_eq!(received.payload, original.payload);
        assert_eq!(inbound.recv().await.unwrap().id, original.id);
        assert_eq!(f.bus.metrics().messages_received, 1);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_rejected() {
        let f = fixture(&["A"]);
        f.bus.keyring().enroll(&AgentId::from("A"));
        let mut events = f.events.subscribe();

        let sealed = f
            .bus
            .seal(&Message::new("A", "hive", json!({"type": "progress_update"})))
            .await
            .unwrap();

        for index in [0, sealed.ciphertext.len() / 2, sealed.ciphertext.len() - 1] {
            let mut tampered = sealed.clone();
            tampered.ciphertext[index] ^= 0x01;
            assert!(matches!(
                f.bus.receive(&tampered).await,
                Err(ChannelError::Crypto(CryptoError::SignatureVerificationFailed(_)))
            ));
        }

        let metrics = f.bus.metrics();
        assert_eq!(metrics.rejected_messages, 3);
        assert_eq!(metrics.messages_received, 0);
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, DomainEvent::Channel(ChannelEvent::MessageRejected { .. }))));

        // The untouched envelope still verifies
        assert!(f.bus.receive(&sealed).await.is_ok());
    }

    #[tokio::test]
    async fn test_forged_sender_is_rejected() {
        let f = fixture(&["A", "B"]);
        f.bus.keyring().enroll(&AgentId::from("A"));
        f.bus.keyring().enroll(&AgentId::from("B"));
        f.bus.connect(&AgentId::from("A")).await.unwrap();

        let mut sealed = f
            .bus
            .seal(&Message::new("B", "hive", json!({"type": "task_acceptance"})))
            .await
            .unwrap();
        // B claims to be A but signed with its own key
        sealed.sender = AgentId::from("A");
        assert!(matches!(
            f.bus.receive(&sealed).await,
            Err(ChannelError::Crypto(CryptoError::SignatureVerificationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_expired_message_is_rejected() {
        let f = fixture(&["A"]);
        f.bus.keyring().enroll(&AgentId::from("A"));
        let sealed = f
            .bus
            .seal(&Message::new("A", "hive", json!({"type": "ping"})).with_ttl_ms(1_000))
            .await
            .unwrap();

        let later = sealed.timestamp + chrono::Duration::seconds(5);
        assert_eq!(
            f.bus.receive_at(&sealed, later).unwrap_err(),
            ChannelError::Expired(sealed.id)
        );
    }

    #[tokio::test]
    async fn test_unbounded_ttl_with_bad_signature_is_rejected() {
        let f = fixture(&["A"]);
        f.bus.keyring().enroll(&AgentId::from("A"));
        let mut sealed = f
            .bus
            .seal(&Message::new("A", "hive", json!({"type": "ping"})))
            .await
            .unwrap();
        sealed.ttl_ms = u64::MAX;
        sealed.signature = "not-a-signature".to_string();

        assert!(matches!(
            f.bus.receive(&sealed).await,
            Err(ChannelError::Crypto(_))
        ));
        assert_eq!(f.bus.metrics().rejected_messages, 1);
    }

    #[tokio::test]
    async fn test_message_at_ttl_deadline_is_accepted() {
        let f = fixture(&["A"]);
        f.bus.keyring().enroll(&AgentId::from("A"));
        let sealed = f
            .bus
            .seal(&Message::new("A", "hive", json!({"type": "ping"})).with_ttl_ms(1_000))
            .await
            .unwrap();

        let deadline = sealed.timestamp + chrono::Duration::milliseconds(1_000);
        assert!(f.bus.receive_at(&sealed, deadline).is_ok());
        assert_eq!(
            f.bus
                .receive_at(&sealed, deadline + chrono::Duration::milliseconds(1))
                .unwrap_err(),
            ChannelError::Expired(sealed.id)
        );
    }

    #[tokio::test]
    async fn test_average_latency_over_receives() {
        let f = fixture(&["A"]);
        f.bus.keyring().enroll(&AgentId::from("A"));

        for latency_ms in [100, 300] {
            let sealed = f
                .bus
                .seal(&Message::new("A", "hive", json!({"type": "ping"})))
                .await
                .unwrap();
            let observed = sealed.timestamp + chrono::Duration::milliseconds(latency_ms);
            f.bus.receive_at(&sealed, observed).unwrap();
        }

        let metrics = f.bus.metrics();
        assert_eq!(metrics.messages_received, 2);
        assert!((metrics.average_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_huge_idle_timeout_never_sweeps() {
        let events = EventBus::new(16);
        let registry = Arc::new(MembershipRegistry::new(RegistryConfig::default(), events.clone()));
        registry
            .register(AgentRegistration::new(
                "A",
                vec![Capability::new("nlp", "language")],
                AgentMetadata::new("A", "tests"),
            ))
            .unwrap();
        let config = ChannelConfig {
            heartbeat_interval: std::time::Duration::from_secs(u64::MAX / 2),
            idle_multiplier: u32::MAX,
            ..ChannelConfig::default()
        };
        let bus = SecureChannelBus::new(
            AgentId::from("hive"),
            config,
            registry,
            Arc::new(InMemoryTransport::new()),
            events,
        );
        let channel = bus.connect(&AgentId::from("A")).await.unwrap();

        let later = channel.last_activity() + chrono::Duration::days(365 * 1000);
        assert!(bus.sweep_idle_channels_at(later).is_empty());
        assert_eq!(bus.channel_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let f = fixture(&["A"]);
        let peer = AgentId::from("A");
        assert!(!f.bus.close(&peer));

        f.bus.connect(&peer).await.unwrap();
        assert!(f.bus.close(&peer));
        assert!(!f.bus.close(&peer));
        assert_eq!(f.bus.metrics().active_channels, 0);
    }

    #[tokio::test]
    async fn test_idle_channels_are_swept() {
        let f = fixture(&["A", "B"]);
        let a = f.bus.connect(&AgentId::from("A")).await.unwrap();
        f.bus.connect(&AgentId::from("B")).await.unwrap();
        f.bus
            .send(Message::new("hive", "A", json!({"type": "ping"})))
            .await;
        let sent_before = f.bus.metrics().messages_sent;

        // Default idle timeout is 30s * 3
        let now = a.last_activity() + chrono::Duration::seconds(91);
        a.touch(now - chrono::Duration::seconds(10));

        let closed = f.bus.sweep_idle_channels_at(now);
        assert_eq!(closed, vec![AgentId::from("B")]);
        assert!(f.bus.channel(&AgentId::from("A")).is_some());
        // Closing a channel keeps the bus counters
        assert_eq!(f.bus.metrics().messages_sent, sent_before);
    }

    #[tokio::test]
    async fn test_metrics_reads_have_no_side_effects() {
        let f = fixture(&["A"]);
        f.bus
            .send(Message::new("hive", "A", json!({"type": "ping"})))
            .await;
        assert_eq!(f.bus.metrics(), f.bus.metrics());
    }
}
