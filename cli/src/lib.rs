// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Vigil CLI library - exposes testable components
//!
//! - [`daemon::server`]: wiring of the swarm and its HTTP/SSE surface
//! - [`daemon::client`]: HTTP client used by the `incident` commands
//! - [`commands`]: subcommand handlers

pub mod commands;
pub mod daemon;
