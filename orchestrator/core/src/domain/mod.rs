// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: incident aggregate, event stream, agent contract, consensus
//! vocabulary and the interfaces of every external collaborator.

pub mod agent;
pub mod consensus;
pub mod dependency;
pub mod events;
pub mod fault;
pub mod incident;
pub mod knowledge;
pub mod llm;
pub mod node_config;
pub mod notification;
pub mod repository;
