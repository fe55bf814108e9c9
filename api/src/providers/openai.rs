//! OpenAI-compatible adapter for moderation, embeddings and generation.
//!
//! Models are opaque external functions as far as the pipeline is concerned;
//! this module only does transport and prompt assembly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use fokus_core::chat::Language;

use super::{
    AnswerGenerator, EmbeddingProvider, GenerationRequest, ModerationProvider, ModerationVerdict,
    ProviderError,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embed_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self {
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            embed_model: std::env::var("FOKUS_EMBED_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
            chat_model: std::env::var("FOKUS_CHAT_MODEL")
                .unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

#[derive(Clone)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        Ok(res.json().await?)
    }
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::English => "English",
        Language::Russian => "Russian",
        Language::Uzbek => "Uzbek",
    }
}

/// Assemble the grounding prompt: answer only from the provided passages,
/// in the detected language, weaving in remembered user facts when relevant.
fn build_system_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::from(
        "You are the Fokus assistant. Answer the user's question using ONLY the \
         context passages below. If the passages do not contain the answer, say \
         you don't have that information yet. Keep replies short and practical.",
    );

    prompt.push_str(&format!(
        "\n\nReply in {}.",
        language_name(request.language)
    ));

    if !request.memory.is_empty() {
        prompt.push_str("\n\nKnown facts about this user:");
        for entry in &request.memory {
            prompt.push_str(&format!("\n- {}", entry.fact));
        }
    }

    if !request.contexts.is_empty() {
        prompt.push_str("\n\nContext passages:");
        for ctx in &request.contexts {
            prompt.push_str(&format!("\n[{}] {}\n{}", ctx.url, ctx.title, ctx.chunk));
        }
    }

    prompt
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f64>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>, ProviderError> {
        if inputs.is_empty() {
            return Err(ProviderError::Config("embedding input is empty".to_string()));
        }

        let parsed: EmbeddingsResponse = self
            .post_json(
                "/v1/embeddings",
                &EmbeddingsRequest {
                    model: &self.config.embed_model,
                    input: inputs,
                },
            )
            .await?;

        if parsed.data.len() != inputs.len() {
            return Err(ProviderError::Malformed(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Serialize)]
struct ModerationsRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationsResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: serde_json::Value,
}

#[async_trait]
impl ModerationProvider for OpenAiProvider {
    async fn review(&self, text: &str) -> Result<ModerationVerdict, ProviderError> {
        let parsed: ModerationsResponse = self
            .post_json("/v1/moderations", &ModerationsRequest { input: text })
            .await?;

        let Some(result) = parsed.results.into_iter().next() else {
            return Err(ProviderError::Malformed(
                "moderation response had no results".to_string(),
            ));
        };

        let category = result
            .categories
            .as_object()
            .and_then(|cats| {
                cats.iter()
                    .find(|(_, flagged)| flagged.as_bool().unwrap_or(false))
                    .map(|(name, _)| name.clone())
            })
            .filter(|_| result.flagged);

        Ok(ModerationVerdict {
            ok: !result.flagged,
            category,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[async_trait]
impl AnswerGenerator for OpenAiProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let payload = ChatCompletionRequest {
            model: &self.config.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: build_system_prompt(&request),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.question.clone(),
                },
            ],
            temperature: 0.3,
        };

        let parsed: ChatCompletionResponse = self.post_json("/v1/chat/completions", &payload).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::Malformed("completion had no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fokus_core::chat::{MemoryEntry, RetrievalContext};

    fn request() -> GenerationRequest {
        GenerationRequest {
            question: "How do streaks work?".to_string(),
            language: Language::Uzbek,
            contexts: vec![RetrievalContext {
                url: "https://fokus.uz/help/streaks".to_string(),
                title: "Streaks".to_string(),
                chunk: "A streak grows by one for each day with a completed focus session."
                    .to_string(),
                chunk_index: 0,
                indexed_at: None,
                score: 0.91,
            }],
            memory: vec![MemoryEntry {
                fact: "Prefers morning focus sessions".to_string(),
                created_at: None,
            }],
        }
    }

    #[test]
    fn system_prompt_carries_language_memory_and_contexts() {
        let prompt = build_system_prompt(&request());
        assert!(prompt.contains("Reply in Uzbek."));
        assert!(prompt.contains("Prefers morning focus sessions"));
        assert!(prompt.contains("https://fokus.uz/help/streaks"));
        assert!(prompt.contains("A streak grows by one"));
    }

    #[test]
    fn system_prompt_omits_empty_sections() {
        let mut req = request();
        req.contexts.clear();
        req.memory.clear();
        let prompt = build_system_prompt(&req);
        assert!(!prompt.contains("Known facts"));
        assert!(!prompt.contains("Context passages"));
    }
}
