// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the HIVE CLI

pub mod config;
pub mod demo;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::demo::DemoArgs;
