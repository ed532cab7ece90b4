// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects, events and configuration of the swarm substrate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types; no I/O beyond config file loading

pub mod agent;
pub mod task;
pub mod message;
pub mod discovery;
pub mod events;
pub mod node_config;
pub mod secure_channel;
