// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `hive-swarm` - Swarm Node Composition Root
//!
//! Wires the three coordination services from `hive-core` into one running node.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `SwarmSnapshot` read model |
//! | [`application`] | Application | `SwarmService` use-case trait, `SwarmRuntime` |
//!
//! ## Key Concepts
//!
//! - **SwarmRuntime**: Builds the event bus, membership registry, secure channel bus
//!   and task allocator from a single `NodeConfigManifest`, then owns the lifecycle
//!   of their background sweeps and the inbound message pump.
//! - **SwarmService**: The operation surface a gateway (HTTP, gRPC) would call. The
//!   gateway itself is not part of this crate.

pub mod domain;
pub mod application;

pub use domain::*;
