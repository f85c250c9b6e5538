//! MemoryRetriever trait — read-only access to the long-term fact store.
//!
//! Facts are scoped to (application, user) plus optional labels and carry a
//! confidence/relevance rank. The engine looks facts up once per user turn
//! before the first model call; an empty result is valid and a failure is
//! degraded to an empty result at the call site.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// The scope a lookup is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryScope {
    /// Application id
    pub app_id: String,

    /// User id
    pub user_id: String,

    /// Optional extra labels; a fact matches if it carries all of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl MemoryScope {
    pub fn new(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }
}

/// A single scoped fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    /// The fact text
    pub fact: String,

    /// Confidence/relevance rank, higher is better
    #[serde(default)]
    pub rank: f32,
}

/// Read-only retriever over an external fact store.
#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// The backend name (e.g. "http", "in_memory").
    fn name(&self) -> &str;

    /// Retrieve up to `limit` facts for the scope, best-ranked first.
    async fn lookup(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, MemoryError>;
}

/// Format retrieved facts into a context block for the system prompt.
/// Empty input yields an empty string so absent facts leave the prompt
/// untouched.
pub fn format_fact_context(facts: &[MemoryFact]) -> String {
    if facts.is_empty() {
        return String::new();
    }

    let mut ctx = String::from("## Known facts\n");
    for (i, fact) in facts.iter().enumerate() {
        ctx.push_str(&format!("{}. [rank={:.2}] {}\n", i + 1, fact.rank, fact.fact));
    }
    ctx
}
