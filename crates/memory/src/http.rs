//! HTTP retriever — client for an external fact-store service.
//!
//! Retrieval endpoint: `POST {base}/v1/facts/retrieve` with the scope and
//! limit; response `{facts: [{fact_text, rank}]}`. The retriever itself is
//! strict about failures; the engine degrades them to an empty context.

use async_trait::async_trait;
use parley_core::error::MemoryError;
use parley_core::memory::{MemoryFact, MemoryRetriever, MemoryScope};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A `MemoryRetriever` backed by an HTTP fact store.
pub struct HttpFactStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    app_id: &'a str,
    user_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
    limit: usize,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    facts: Vec<WireFact>,
}

#[derive(Deserialize)]
struct WireFact {
    fact_text: String,
    #[serde(default)]
    rank: f32,
}

impl HttpFactStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl MemoryRetriever for HttpFactStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn lookup(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, MemoryError> {
        let url = format!("{}/v1/facts/retrieve", self.base_url);
        let body = RetrieveRequest {
            app_id: &scope.app_id,
            user_id: &scope.user_id,
            labels: scope.labels.clone(),
            limit,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MemoryError::Lookup(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MemoryError::Lookup(format!(
                "fact store returned {status}: {detail}"
            )));
        }

        let parsed: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Lookup(format!("bad response body: {e}")))?;

        debug!(
            app_id = %scope.app_id,
            user_id = %scope.user_id,
            count = parsed.facts.len(),
            "retrieved facts"
        );

        Ok(parsed
            .facts
            .into_iter()
            .map(|f| MemoryFact {
                fact: f.fact_text,
                rank: f.rank,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let store = HttpFactStore::new("https://facts.example.org/", None);
        assert_eq!(store.base_url, "https://facts.example.org");
    }

    #[test]
    fn response_parsing_maps_wire_fields() {
        let parsed: RetrieveResponse = serde_json::from_str(
            r#"{"facts": [{"fact_text": "Panel P-12 covered AI, not inflation", "rank": 0.87}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].fact_text, "Panel P-12 covered AI, not inflation");
        assert!((parsed.facts[0].rank - 0.87).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_facts_field_is_empty() {
        let parsed: RetrieveResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.facts.is_empty());
    }
}
