// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Agent execution plumbing shared by the pipeline stages.
//!
//! The runtime resolves an agent's backend from the call-time registry,
//! wraps it in a retrying client wired to the generation's cost tracker,
//! and provides the batching helpers stages use for fan-out. Batch outputs
//! always merge in input order, so a batched stage is a pure function of
//! its inputs given a seeded backend.

use crate::llm::client::{LlmClient, RetryConfig};
use crate::llm::cost::CostTracker;
use crate::llm::provider::CompletionOptions;
use crate::llm::registry::{AgentRegistry, AgentSettings, ProviderFactory};
use crate::utils::error::PlanweaveError;
use std::sync::{Arc, Mutex};

/// Bounded fan-out width for batched LLM calls within one stage.
pub const DEFAULT_WORKERS: usize = 4;

/// A resolved agent: its client plus the settings it was resolved with.
pub struct AgentHandle {
    pub client: LlmClient,
    pub settings: AgentSettings,
}

impl AgentHandle {
    /// Completion options derived from the agent's settings.
    pub fn options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        }
    }
}

/// Builds per-agent clients against the process-wide registry.
pub struct AgentRuntime {
    registry: Arc<AgentRegistry>,
    factory: ProviderFactory,
    retry: RetryConfig,
    cost: Arc<Mutex<CostTracker>>,
    pub workers: usize,
}

impl AgentRuntime {
    pub fn new(
        registry: Arc<AgentRegistry>,
        factory: ProviderFactory,
        retry: RetryConfig,
        cost: Arc<Mutex<CostTracker>>,
    ) -> Self {
        Self {
            registry,
            factory,
            retry,
            cost,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Resolve an agent's settings and build its client.
    ///
    /// Resolution happens here, at call time, so registry updates apply on
    /// the next stage invocation.
    pub fn handle(&self, agent: &str) -> Result<AgentHandle, PlanweaveError> {
        let settings = self.registry.resolve(agent);
        let provider = (self.factory)(&settings)?;
        let client = LlmClient::new(agent, provider)
            .with_retry_config(self.retry.clone())
            .with_cost_tracker(Arc::clone(&self.cost));
        Ok(AgentHandle { client, settings })
    }

    pub fn cost_tracker(&self) -> Arc<Mutex<CostTracker>> {
        Arc::clone(&self.cost)
    }
}

/// Split items into batches: one batch when at or under `threshold`,
/// otherwise slices of `batch_size`.
pub fn split_batches<T>(items: Vec<T>, batch_size: usize, threshold: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    if items.len() <= threshold {
        return vec![items];
    }

    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cost::CostCalculator;
    use crate::llm::provider::{
        ChatProvider, CompletionResponse, Message, Pricing,
    };
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        async fn complete(
            &self,
            messages: &[Message],
            _options: &CompletionOptions,
        ) -> Result<CompletionResponse, PlanweaveError> {
            Ok(CompletionResponse::new(
                messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                1,
                1,
            ))
        }

        fn model(&self) -> &str {
            "echo"
        }

        fn pricing(&self) -> Pricing {
            Pricing {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            }
        }
    }

    fn test_runtime() -> AgentRuntime {
        let factory: ProviderFactory = Arc::new(|_settings| Ok(Arc::new(EchoProvider) as _));
        AgentRuntime::new(
            Arc::new(AgentRegistry::default()),
            factory,
            RetryConfig::default(),
            Arc::new(Mutex::new(CostTracker::new(CostCalculator::new(Pricing {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            })))),
        )
    }

    #[tokio::test]
    async fn test_handle_uses_registry_settings() {
        let runtime = test_runtime();
        let handle = runtime.handle("selector").unwrap();
        assert_eq!(handle.client.agent(), "selector");
        assert_eq!(handle.options().temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_handle_records_cost() {
        let runtime = test_runtime();
        let handle = runtime.handle("timing").unwrap();
        handle
            .client
            .complete("probe", &[Message::user("hi")], &handle.options())
            .await
            .unwrap();

        let tracker = runtime.cost_tracker();
        let tracker = tracker.lock().unwrap();
        assert_eq!(tracker.operation_count(), 1);
        assert_eq!(tracker.breakdown()[0].operation, "timing_probe");
    }

    #[test]
    fn test_split_under_threshold_single_batch() {
        let batches = split_batches(vec![1, 2, 3], 2, 10);
        assert_eq!(batches, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_split_over_threshold_batch_sized() {
        let items: Vec<i32> = (0..7).collect();
        let batches = split_batches(items, 3, 5);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![0, 1, 2]);
        assert_eq!(batches[1], vec![3, 4, 5]);
        assert_eq!(batches[2], vec![6]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_batches(Vec::<i32>::new(), 3, 5).is_empty());
    }
}
