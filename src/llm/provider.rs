// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

use crate::utils::error::PlanweaveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Number of prompt/input tokens used.
    pub prompt_tokens: usize,
    /// Number of completion/output tokens used.
    pub completion_tokens: usize,
}

impl CompletionResponse {
    /// Create a new CompletionResponse with separate token counts.
    pub fn new(content: String, prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            content,
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens used (prompt + completion).
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// A text-generation backend.
///
/// Implementations wrap one concrete API (OpenAI-compatible, local Ollama)
/// behind a uniform chat-completion call. Structured output is layered on
/// top by [`crate::llm::client::LlmClient`], not by providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, PlanweaveError>;

    fn model(&self) -> &str;

    fn pricing(&self) -> Pricing;
}

/// A text-embedding backend with a fixed output dimension.
///
/// `dimension()` is checked against the knowledge store's configured
/// dimension at startup; a mismatch is fatal.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError>;

    fn dimension(&self) -> usize;

    fn model(&self) -> &str;
}
