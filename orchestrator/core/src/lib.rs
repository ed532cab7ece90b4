// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HIVE Core
//!
//! Swarm coordination substrate: membership and liveness tracking, the
//! authenticated channel bus, and the task allocation state machine.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, infrastructure adapters and application services

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
