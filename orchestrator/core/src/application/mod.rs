// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod background;
pub mod registry;
pub mod channel_bus;
pub mod allocator;

// Re-export services for convenience
pub use allocator::{AcceptanceOutcome, AllocatorError, TaskAllocator};
pub use channel_bus::{BusMetricsSnapshot, ChannelError, SecureChannel, SecureChannelBus};
pub use registry::{MembershipRegistry, RegistryError};
