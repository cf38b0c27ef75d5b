// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pure swarm logic with no I/O: the role dependency graph, the consensus
//! engine and the fallback cache.

pub mod consensus;
pub mod fallback;
pub mod graph;

pub use consensus::{ConsensusEngine, Evaluation};
pub use fallback::FallbackCache;
pub use graph::{DependencyGraph, GraphError};
