//! Local Ollama backend: chat via the OpenAI-compatible endpoint,
//! embeddings via the native `/api/embed` endpoint.

use crate::llm::provider::{
    ChatProvider, CompletionOptions, CompletionResponse, Embedder, Message, Pricing,
};
use crate::llm::providers::ensure_success;
use crate::utils::error::PlanweaveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HOST: &str = "http://localhost:11434";

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
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(host: String, model: String) -> Result<Self, PlanweaveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_env() -> Result<Self, PlanweaveError> {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string());
        Self::new(host, model)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
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
            .post(format!("{}/v1/chat/completions", self.host))
            .json(&request)
            .send()
            .await?;

        let response = ensure_success("ollama", response).await?;
        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PlanweaveError::Backend {
                backend: "ollama".to_string(),
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

    /// Local inference is free.
    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        }
    }
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    host: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(host: String, model: String, dimension: usize) -> Result<Self, PlanweaveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| PlanweaveError::Backend {
            backend: "ollama".to_string(),
            message: "Embedding response was empty".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.host))
            .json(&request)
            .send()
            .await?;

        let response = ensure_success("ollama", response).await?;
        let body: EmbedResponse = response.json().await?;
        if body.embeddings.len() != texts.len() {
            return Err(PlanweaveError::Backend {
                backend: "ollama".to_string(),
                message: format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    body.embeddings.len()
                ),
            });
        }

        for vector in &body.embeddings {
            if vector.len() != self.dimension {
                return Err(PlanweaveError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(body.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}
