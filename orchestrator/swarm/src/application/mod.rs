// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the coordinator that drives incidents and the operator
//! commands in front of it.

pub mod admin;
pub mod coordinator;

pub use admin::{AdminCommands, AdminError};
pub use coordinator::{AbortOutcome, CoordinatorError, SwarmCoordinator};
