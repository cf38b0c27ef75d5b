// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Dependency Graph
//!
//! Static DAG of which roles must finish before another may start. Validated
//! once at startup with Kahn's algorithm; a cycle or an edge to an unknown
//! role is fatal. [`DependencyGraph::levels`] groups roles whose dependencies
//! are all satisfied by earlier levels; roles within a level run concurrently.

use std::collections::{BTreeMap, BTreeSet};
use vigil_core::domain::agent::AgentRole;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Dependency cycle involving {0:?}")]
    Cycle(Vec<AgentRole>),

    #[error("{role} depends on {dependency}, which is not part of the graph")]
    UnknownDependency { role: AgentRole, dependency: AgentRole },

    #[error("{0} depends on itself")]
    SelfDependency(AgentRole),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// role -> roles it waits for
    edges: BTreeMap<AgentRole, BTreeSet<AgentRole>>,
    levels: Vec<Vec<AgentRole>>,
}

impl DependencyGraph {
    /// Build and validate a graph from `(role, depends_on)` pairs.
    pub fn new<I>(roles: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (AgentRole, Vec<AgentRole>)>,
    {
        let edges: BTreeMap<AgentRole, BTreeSet<AgentRole>> = roles
            .into_iter()
            .map(|(role, deps)| (role, deps.into_iter().collect()))
            .collect();

        for (role, deps) in &edges {
            for dep in deps {
                if dep == role {
                    return Err(GraphError::SelfDependency(*role));
                }
                if !edges.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        role: *role,
                        dependency: *dep,
                    });
                }
            }
        }

        let levels = Self::kahn_levels(&edges)?;
        Ok(Self { edges, levels })
    }

    /// Detection -> {Diagnosis, Prediction} -> Resolution -> Communication.
    pub fn standard() -> Result<Self, GraphError> {
        Self::new([
            (AgentRole::Detection, vec![]),
            (AgentRole::Diagnosis, vec![AgentRole::Detection]),
            (AgentRole::Prediction, vec![AgentRole::Detection]),
            (AgentRole::Resolution, vec![AgentRole::Diagnosis, AgentRole::Prediction]),
            (AgentRole::Communication, vec![AgentRole::Resolution]),
        ])
    }

    fn kahn_levels(edges: &BTreeMap<AgentRole, BTreeSet<AgentRole>>) -> Result<Vec<Vec<AgentRole>>, GraphError> {
        let mut in_degree: BTreeMap<AgentRole, usize> = edges.iter().map(|(r, d)| (*r, d.len())).collect();
        let mut levels = Vec::new();
        let mut ready: Vec<AgentRole> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(r, _)| *r)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            for role in &ready {
                in_degree.remove(role);
            }
            placed += ready.len();

            let mut next = Vec::new();
            for (role, degree) in in_degree.iter_mut() {
                let satisfied = edges[role].iter().filter(|dep| ready.contains(dep)).count();
                *degree -= satisfied;
                if *degree == 0 {
                    next.push(*role);
                }
            }
            levels.push(std::mem::replace(&mut ready, next));
        }

        if placed != edges.len() {
            return Err(GraphError::Cycle(in_degree.into_keys().collect()));
        }
        Ok(levels)
    }

    pub fn levels(&self) -> &[Vec<AgentRole>] {
        &self.levels
    }

    pub fn level_of(&self, role: AgentRole) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(&role))
    }

    pub fn dependencies(&self, role: AgentRole) -> impl Iterator<Item = &AgentRole> {
        self.edges.get(&role).into_iter().flatten()
    }

    pub fn roles(&self) -> impl Iterator<Item = &AgentRole> {
        self.edges.keys()
    }
}
