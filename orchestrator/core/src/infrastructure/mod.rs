// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod event_bus;
pub mod transport;

pub use event_bus::{DomainEvent, EventBus, EventBusError, EventReceiver, TaskEventReceiver};
pub use transport::{InMemoryTransport, MessageTransport, TransportError};
