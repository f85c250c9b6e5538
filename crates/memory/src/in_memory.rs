//! In-memory retriever — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use parley_core::error::MemoryError;
use parley_core::memory::{MemoryFact, MemoryRetriever, MemoryScope};
use tokio::sync::RwLock;

/// A retriever over facts seeded directly into process memory.
pub struct InMemoryFacts {
    entries: RwLock<Vec<(MemoryScope, MemoryFact)>>,
}

impl InMemoryFacts {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Seed one fact under a scope.
    pub async fn seed(&self, scope: MemoryScope, fact: impl Into<String>, rank: f32) {
        self.entries.write().await.push((
            scope,
            MemoryFact {
                fact: fact.into(),
                rank,
            },
        ));
    }
}

impl Default for InMemoryFacts {
    fn default() -> Self {
        Self::new()
    }
}

fn scope_matches(stored: &MemoryScope, query: &MemoryScope) -> bool {
    stored.app_id == query.app_id
        && stored.user_id == query.user_id
        && query.labels.iter().all(|l| stored.labels.contains(l))
}

#[async_trait]
impl MemoryRetriever for InMemoryFacts {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn lookup(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, MemoryError> {
        let entries = self.entries.read().await;
        let mut results: Vec<MemoryFact> = entries
            .iter()
            .filter(|(stored, _)| scope_matches(stored, scope))
            .map(|(_, fact)| fact.clone())
            .collect();

        results.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_filters_by_scope() {
        let facts = InMemoryFacts::new();
        facts
            .seed(MemoryScope::new("parley", "u1"), "u1 tracks AI panels", 0.9)
            .await;
        facts
            .seed(MemoryScope::new("parley", "u2"), "u2 tracks macro talks", 0.8)
            .await;

        let results = facts
            .lookup(&MemoryScope::new("parley", "u1"), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].fact.contains("u1"));
    }

    #[tokio::test]
    async fn lookup_ranks_and_truncates() {
        let facts = InMemoryFacts::new();
        let scope = MemoryScope::new("parley", "u1");
        facts.seed(scope.clone(), "low", 0.1).await;
        facts.seed(scope.clone(), "high", 0.9).await;
        facts.seed(scope.clone(), "mid", 0.5).await;

        let results = facts.lookup(&scope, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].fact, "high");
        assert_eq!(results[1].fact, "mid");
    }

    #[tokio::test]
    async fn label_filter_requires_all_labels() {
        let facts = InMemoryFacts::new();
        facts
            .seed(
                MemoryScope::new("parley", "u1").with_labels(vec!["talks".into(), "2026".into()]),
                "labelled fact",
                0.5,
            )
            .await;

        let hit = facts
            .lookup(
                &MemoryScope::new("parley", "u1").with_labels(vec!["talks".into()]),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = facts
            .lookup(
                &MemoryScope::new("parley", "u1").with_labels(vec!["podcasts".into()]),
                10,
            )
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let facts = InMemoryFacts::new();
        let results = facts
            .lookup(&MemoryScope::new("parley", "u1"), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
