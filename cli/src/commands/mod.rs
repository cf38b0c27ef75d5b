// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Vigil CLI

pub mod config;
pub mod incident;

pub use self::config::ConfigCommand;
pub use self::incident::IncidentCommand;
