use crate::llm::cost::CostTracker;
use crate::llm::provider::{ChatProvider, CompletionOptions, CompletionResponse, Message};
use crate::utils::error::PlanweaveError;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries; attempt N waits `base × N`.
    pub base_delay: Duration,
    /// Ceiling on the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt)
            .min(self.max_delay)
    }
}

/// A chat backend wrapped with retry, structured-output parsing, and cost
/// accounting for one agent.
///
/// Transient failures (rate limits, network errors) and malformed
/// structured output are retried up to `max_retries` with linear-scaled
/// backoff; other backend errors escalate immediately.
pub struct LlmClient {
    agent: String,
    provider: Arc<dyn ChatProvider>,
    retry_config: RetryConfig,
    cost_tracker: Option<Arc<Mutex<CostTracker>>>,
}

impl LlmClient {
    pub fn new(agent: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            agent: agent.into(),
            provider,
            retry_config: RetryConfig::default(),
            cost_tracker: None,
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<Mutex<CostTracker>>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    /// The agent key this client was built for.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Get the model name from the provider.
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Get pricing information from the provider.
    pub fn pricing(&self) -> crate::llm::provider::Pricing {
        self.provider.pricing()
    }

    /// Complete a prompt, retrying transient failures with backoff.
    ///
    /// `operation` names the call in the cost breakdown and logs.
    pub async fn complete(
        &self,
        operation: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, PlanweaveError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.provider.complete(messages, options).await {
                Ok(response) => {
                    tracing::debug!(
                        agent = %self.agent,
                        operation,
                        attempt,
                        prompt_tokens = response.prompt_tokens,
                        completion_tokens = response.completion_tokens,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "LLM call complete"
                    );
                    tracing::trace!(
                        agent = %self.agent,
                        operation,
                        prompt = %messages
                            .iter()
                            .map(|m| m.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n---\n"),
                        response = %response.content,
                        "LLM call transcript"
                    );
                    self.record_cost(operation, response.prompt_tokens, response.completion_tokens);
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt <= self.retry_config.max_retries => {
                    let delay = match &err {
                        PlanweaveError::RateLimited {
                            retry_after: Some(after),
                            ..
                        } => *after,
                        _ => self.retry_config.delay_for_attempt(attempt),
                    };
                    tracing::warn!(
                        agent = %self.agent,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Complete a prompt and parse the response into a typed value.
    ///
    /// The response may wrap the JSON payload in prose or a code fence; the
    /// first balanced JSON object or array is extracted before parsing.
    /// Malformed output is retried like a transient failure; after
    /// exhaustion the caller receives `MalformedOutput` and applies its
    /// agent-specific fallback.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        operation: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<T, PlanweaveError> {
        let mut attempt: u32 = 0;
        let mut last_error: Option<PlanweaveError> = None;

        while attempt <= self.retry_config.max_retries {
            attempt += 1;
            let response = self.complete(operation, messages, options).await?;

            match parse_structured::<T>(&self.agent, &response.content) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        agent = %self.agent,
                        operation,
                        attempt,
                        error = %err,
                        "Malformed structured output"
                    );
                    last_error = Some(err);
                    if attempt <= self.retry_config.max_retries {
                        tokio::time::sleep(self.retry_config.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PlanweaveError::malformed(&self.agent, "no attempts were made")))
    }

    fn record_cost(&self, operation: &str, prompt_tokens: usize, completion_tokens: usize) {
        if let Some(ref tracker) = self.cost_tracker
            && let Ok(mut tracker) = tracker.lock()
        {
            tracker.add_operation(
                format!("{}_{}", self.agent, operation),
                prompt_tokens,
                completion_tokens,
            );
        }
    }
}

/// Parse a structured response, extracting the first JSON payload.
fn parse_structured<T: DeserializeOwned>(agent: &str, content: &str) -> Result<T, PlanweaveError> {
    let payload = extract_json_block(content)
        .ok_or_else(|| PlanweaveError::malformed(agent, "response contained no JSON payload"))?;

    serde_json::from_str(payload).map_err(|err| PlanweaveError::MalformedOutput {
        agent: agent.to_string(),
        message: format!("JSON did not match the expected shape: {}", err),
        source: Some(Box::new(err)),
    })
}

/// Extract the first balanced JSON object or array from free-form text.
///
/// Handles string escapes so braces inside string literals do not
/// unbalance the scan.
fn extract_json_block(content: &str) -> Option<&str> {
    let start = content.find(['{', '['])?;
    let bytes = content.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}
