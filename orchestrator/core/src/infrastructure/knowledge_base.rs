// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory precedent store.
//!
//! Similarity is Jaccard overlap between the lowercase word sets of the query
//! and each precedent's title, summary and tags. Precedents are loaded once at
//! startup from a YAML or JSON list and never mutated.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

use crate::domain::knowledge::{KnowledgeBase, KnowledgeError, Precedent, ScoredPrecedent};

#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    precedents: Vec<Precedent>,
    terms: Vec<BTreeSet<String>>,
    by_id: HashMap<String, usize>,
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl InMemoryKnowledgeBase {
    pub fn new(precedents: Vec<Precedent>) -> Self {
        let terms = precedents
            .iter()
            .map(|p| {
                let mut terms = tokenize(&p.title);
                terms.extend(tokenize(&p.summary));
                terms.extend(p.tags.iter().map(|t| t.to_lowercase()));
                terms
            })
            .collect();
        let by_id = precedents
            .iter()
            .enumerate()
            .map(|(index, p)| (p.id.clone(), index))
            .collect();
        Self {
            precedents,
            terms,
            by_id,
        }
    }

    /// Load precedents from a `.json` file, or YAML for any other extension.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let precedents: Vec<Precedent> = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        info!(path = %path.display(), count = precedents.len(), "Loaded knowledge base precedents");
        Ok(Self::new(precedents))
    }

    pub fn len(&self) -> usize {
        self.precedents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precedents.is_empty()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn similar(&self, query: &str, limit: usize) -> Result<Vec<ScoredPrecedent>, KnowledgeError> {
        let query = tokenize(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredPrecedent> = self
            .precedents
            .iter()
            .zip(&self.terms)
            .filter_map(|(precedent, terms)| {
                let overlap = query.intersection(terms).count();
                if overlap == 0 {
                    return None;
                }
                let union = query.union(terms).count();
                Some(ScoredPrecedent {
                    precedent: precedent.clone(),
                    similarity: overlap as f64 / union as f64,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.precedent.id.cmp(&b.precedent.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn get(&self, id: &str) -> Result<Option<Precedent>, KnowledgeError> {
        Ok(self.by_id.get(id).map(|&index| self.precedents[index].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn precedent(id: &str, title: &str, action: &str, related: &[&str]) -> Precedent {
        Precedent {
            id: id.into(),
            title: title.into(),
            summary: String::new(),
            action: action.into(),
            tags: vec![],
            related: related.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_similar_ranks_by_overlap() {
        let kb = InMemoryKnowledgeBase::new(vec![
            precedent("p1", "checkout latency after deploy", "rollback_deploy", &[]),
            precedent("p2", "database connection pool exhausted", "raise_pool_size", &[]),
            precedent("p3", "checkout errors", "restart_checkout", &[]),
        ]);

        let results = kb.similar("checkout latency spike", 5).await.unwrap();
        assert_eq!(results[0].precedent.id, "p1");
        assert_eq!(results.len(), 2);
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let kb = InMemoryKnowledgeBase::default();
        assert!(kb.similar("anything at all", 3).await.unwrap().is_empty());
        assert!(kb.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precedents.yaml");
        std::fs::write(
            &path,
            "- id: p1\n  title: disk full on ingest nodes\n  action: expand_volume\n  related: [p2]\n",
        )
        .unwrap();

        let kb = InMemoryKnowledgeBase::from_file(&path).unwrap();
        assert_eq!(kb.len(), 1);
        let p = kb.get("p1").await.unwrap().unwrap();
        assert_eq!(p.related, vec!["p2".to_string()]);
    }
}
