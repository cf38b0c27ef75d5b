// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `vigil-swarm`
//!
//! The five incident-response agents, the consensus engine that combines
//! their votes and the coordinator that runs them level by level.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `DependencyGraph`, `ConsensusEngine`, `FallbackCache` |
//! | [`agents`] | Infrastructure | Detection, Diagnosis, Prediction, Resolution, Communication |
//! | [`application`] | Application | `SwarmCoordinator`, `AdminCommands` |
//!
//! Incident state, events and the agent contract live in `vigil-core`.

pub mod agents;
pub mod application;
pub mod domain;

pub use application::{AdminCommands, SwarmCoordinator};
pub use domain::*;
