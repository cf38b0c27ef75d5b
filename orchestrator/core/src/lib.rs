// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # vigil-core
//!
//! Coordination substrate of the Vigil incident swarm.
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`domain`] | Incident aggregate, hash-chained events, agent contract, consensus types, config manifest |
//! | [`infrastructure`] | Event stores, circuit breaker, priority rate limiter, dependency guards, broadcast hub, adapters |
//! | [`application`] | [`application::event_log::EventLog`]: append, publish, repair-on-read |
//!
//! Agents, the consensus engine and the coordinator live in `vigil-swarm`.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
