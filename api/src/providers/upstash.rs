//! REST adapter for the hosted vector index.
//!
//! The index's storage engine is an external collaborator; this module only
//! issues similarity queries and hands raw matches to the retrieval engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ProviderError, VectorIndex, VectorMatch};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl VectorIndexConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        let base_url = std::env::var("FOKUS_VECTOR_URL")
            .map_err(|_| ProviderError::Config("FOKUS_VECTOR_URL is not set".to_string()))?;
        let token = std::env::var("FOKUS_VECTOR_TOKEN")
            .map_err(|_| ProviderError::Config("FOKUS_VECTOR_TOKEN is not set".to_string()))?;
        Ok(Self {
            base_url,
            token,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

#[derive(Clone)]
pub struct UpstashVectorIndex {
    config: VectorIndexConfig,
    client: Client,
}

impl UpstashVectorIndex {
    pub fn new(config: VectorIndexConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    vector: &'a [f64],
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    score: f64,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[async_trait]
impl VectorIndex for UpstashVectorIndex {
    async fn query(
        &self,
        vector: &[f64],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let res = self
            .client
            .post(self.query_url())
            .bearer_auth(&self.config.token)
            .json(&QueryRequest {
                vector,
                top_k,
                include_metadata,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: QueryResponse = res.json().await?;
        Ok(parsed
            .result
            .into_iter()
            .map(|m| VectorMatch {
                score: m.score,
                metadata: m.metadata.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }
}
