// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message transport seam.
//!
//! Network framing (TCP/QUIC/WebSocket) is outside this crate. The bus hands
//! sealed messages to a [`MessageTransport`]; the in-memory implementation
//! keeps per-recipient mailboxes for in-process swarms and tests.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

use crate::domain::agent::AgentId;
use crate::domain::message::SealedMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Peer {0} is unreachable")]
    Unreachable(AgentId),

    #[error("Transport failure: {0}")]
    Failed(String),
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn transmit(&self, envelope: &SealedMessage) -> Result<(), TransportError>;
}

/// Loopback transport backed by per-recipient queues.
#[derive(Default)]
pub struct InMemoryTransport {
    mailboxes: DashMap<AgentId, VecDeque<SealedMessage>>,
    unreachable: DashSet<AgentId>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything delivered to `peer`, oldest first.
    pub fn take(&self, peer: &AgentId) -> Vec<SealedMessage> {
        self.mailboxes
            .get_mut(peer)
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, peer: &AgentId) -> usize {
        self.mailboxes.get(peer).map(|q| q.len()).unwrap_or(0)
    }

    /// Simulate a network partition towards `peer`.
    pub fn set_unreachable(&self, peer: &AgentId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(peer.clone());
        } else {
            self.unreachable.remove(peer);
        }
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn transmit(&self, envelope: &SealedMessage) -> Result<(), TransportError> {
        if self.unreachable.contains(&envelope.recipient) {
            return Err(TransportError::Unreachable(envelope.recipient.clone()));
        }
        debug!(
            message_id = %envelope.id,
            recipient = %envelope.recipient,
            bytes = envelope.ciphertext.len(),
            "Queued envelope in mailbox"
        );
        self.mailboxes
            .entry(envelope.recipient.clone())
            .or_default()
            .push_back(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageId;
    use chrono::Utc;

    fn envelope(to: &str, marker: u8) -> SealedMessage {
        SealedMessage {
            id: MessageId::new(),
            sender: AgentId::from("hive"),
            recipient: AgentId::from(to),
            ciphertext: vec![marker],
            timestamp: Utc::now(),
            ttl_ms: 1_000,
            signature: String::new(),
        }
    }

    #[tokio::test]
    async fn test_mailbox_is_fifo() {
        let transport = InMemoryTransport::new();
        for marker in 0..3 {
            transport.transmit(&envelope("A", marker)).await.unwrap();
        }
        assert_eq!(transport.pending(&AgentId::from("A")), 3);

        let drained: Vec<u8> = transport
            .take(&AgentId::from("A"))
            .iter()
            .map(|e| e.ciphertext[0])
            .collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert_eq!(transport.pending(&AgentId::from("A")), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let transport = InMemoryTransport::new();
        let peer = AgentId::from("B");
        transport.set_unreachable(&peer, true);
        assert!(matches!(
            transport.transmit(&envelope("B", 0)).await,
            Err(TransportError::Unreachable(_))
        ));

        transport.set_unreachable(&peer, false);
        assert!(transport.transmit(&envelope("B", 0)).await.is_ok());
    }
}
