//! OpenAI-compatible backend: chat completions and embeddings.
//!
//! Also used for any API speaking the same wire format when an agent's
//! `api_base` points elsewhere.

use crate::llm::provider::{
    ChatProvider, CompletionOptions, CompletionResponse, Embedder, Message, Pricing,
};
use crate::llm::providers::ensure_success;
use crate::utils::error::PlanweaveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRecord>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRecord {
    embedding: Vec<f32>,
    index: usize,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Result<Self, PlanweaveError> {
        Self::with_api_base(api_key, model, DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(
        api_key: String,
        model: String,
        api_base: String,
    ) -> Result<Self, PlanweaveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_env() -> Result<Self, PlanweaveError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PlanweaveError::missing_api_key("openai"))?;
        Self::new(api_key, "gpt-4o-mini".to_string())
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, PlanweaveError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let response = ensure_success("openai", response).await?;
        let body: ChatResponse = response.json().await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PlanweaveError::Backend {
                backend: "openai".to_string(),
                message: "Response contained no choices".to_string(),
            })?;

        Ok(CompletionResponse::new(
            content,
            body.usage.prompt_tokens,
            body.usage.completion_tokens,
        ))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        }
    }
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimension: usize) -> Result<Self, PlanweaveError> {
        Self::with_api_base(api_key, model, dimension, DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(
        api_key: String,
        model: String,
        dimension: usize,
        api_base: String,
    ) -> Result<Self, PlanweaveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| PlanweaveError::Backend {
            backend: "openai".to_string(),
            message: "Embedding response was empty".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let response = ensure_success("openai", response).await?;
        let body: EmbeddingResponse = response.json().await?;

        if body.data.len() != texts.len() {
            return Err(PlanweaveError::Backend {
                backend: "openai".to_string(),
                message: format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    body.data.len()
                ),
            });
        }

        // Records are matched to inputs by their index field, not array position
        let mut records = body.data;
        records.sort_by_key(|r| r.index);

        let vectors: Vec<Vec<f32>> = records.into_iter().map(|r| r.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(PlanweaveError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}
