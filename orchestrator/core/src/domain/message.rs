// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Messages
//!
//! Three representations of the same message flow through the substrate:
//!
//! - [`Message`]: cleartext, at the API boundary. The payload is an arbitrary
//!   JSON value whose `type` field discriminates the protocol.
//! - [`SealedMessage`]: encrypted and signed, while queued or in transit.
//! - [`SwarmMessage`]: the typed view of the payloads the allocator understands.
//!   Any other `type` is passed through untouched for other consumers
//!   (consensus, funding) that share the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::task::{TaskId, TaskPriority, TaskRequirement, TaskStatus};

pub const DEFAULT_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: AgentId,
    pub recipient: AgentId,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Message {
    pub fn new(sender: impl Into<AgentId>, recipient: impl Into<AgentId>, payload: Value) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload,
            timestamp: Utc::now(),
            ttl_ms: DEFAULT_TTL_MS,
            signature: None,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// The payload's `type` discriminator, if any.
    pub fn message_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// Copy of this message addressed to a different recipient, with a fresh id.
    pub fn readdressed(&self, recipient: &AgentId) -> Self {
        Self {
            id: MessageId::new(),
            recipient: recipient.clone(),
            signature: None,
            ..self.clone()
        }
    }
}

/// Encrypted, signed form of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub id: MessageId,
    pub sender: AgentId,
    pub recipient: AgentId,
    pub ciphertext: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    /// Base64 Ed25519 signature over [`SealedMessage::signing_input`]
    pub signature: String,
}

impl SealedMessage {
    /// Canonical bytes covered by the signature.
    ///
    /// Every variable-length field is length-prefixed so that no two distinct
    /// messages share an encoding. The full ciphertext is always included.
    pub fn signing_input(&self) -> Vec<u8> {
        signing_input(
            &self.id,
            &self.sender,
            &self.recipient,
            self.timestamp,
            self.ttl_ms,
            &self.ciphertext,
        )
    }

    /// A TTL too large to represent never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        i64::try_from(self.ttl_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|ttl| self.timestamp.checked_add_signed(ttl))
            .is_some_and(|deadline| deadline < now)
    }
}

pub(crate) fn signing_input(
    id: &MessageId,
    sender: &AgentId,
    recipient: &AgentId,
    timestamp: DateTime<Utc>,
    ttl_ms: u64,
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + sender.0.len() + recipient.0.len() + ciphertext.len());
    buf.extend_from_slice(id.0.as_bytes());
    for field in [sender.0.as_bytes(), recipient.0.as_bytes()] {
        buf.extend_from_slice(&(field.len() as u64).to_be_bytes());
        buf.extend_from_slice(field);
    }
    buf.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    buf.extend_from_slice(&ttl_ms.to_be_bytes());
    buf.extend_from_slice(&(ciphertext.len() as u64).to_be_bytes());
    buf.extend_from_slice(ciphertext);
    buf
}

/// Outcome of a single send. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub recipient: AgentId,
    pub delivered: bool,
    pub bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Protocol payloads exchanged between the allocator and agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmMessage {
    TaskOffer {
        task_id: TaskId,
        description: String,
        requirements: Vec<TaskRequirement>,
        priority: TaskPriority,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<DateTime<Utc>>,
        #[serde(default)]
        dependencies: Vec<TaskId>,
        max_concurrent_agents: u32,
    },
    TaskStart {
        task_id: TaskId,
        assigned_agents: Vec<AgentId>,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskAcceptance {
        task_id: TaskId,
        agent_id: AgentId,
    },
    TaskRejection {
        task_id: TaskId,
        agent_id: AgentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ProgressUpdate {
        task_id: TaskId,
        agent_id: AgentId,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<TaskStatus>,
    },
    CoordinationRequest {
        task_id: TaskId,
        agent_id: AgentId,
        #[serde(default)]
        payload: Value,
    },
    CoordinationResponse {
        task_id: TaskId,
        from_agent: AgentId,
        #[serde(default)]
        payload: Value,
    },
}

impl SwarmMessage {
    /// Parse a payload. Returns `None` for payloads meant for other consumers.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn to_payload(&self) -> Value {
        // Serializing a plain enum of owned data cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskOffer { task_id, .. }
            | Self::TaskStart { task_id, .. }
            | Self::TaskCompleted { task_id }
            | Self::TaskAcceptance { task_id, .. }
            | Self::TaskRejection { task_id, .. }
            | Self::ProgressUpdate { task_id, .. }
            | Self::CoordinationRequest { task_id, .. }
            | Self::CoordinationResponse { task_id, .. } => *task_id,
        }
    }
}
