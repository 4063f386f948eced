// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod cost;
pub mod embedder;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod tokenizer;

pub use client::{LlmClient, RetryConfig};
pub use cost::{CostBreakdown, CostCalculator, CostSummary, CostTracker};
pub use embedder::CachingEmbedder;
pub use provider::{ChatProvider, CompletionOptions, CompletionResponse, Embedder, Message, Pricing};
pub use registry::{AgentRegistry, AgentSettings, ProviderFactory, default_provider_factory};
pub use tokenizer::{TiktokenTokenizer, Tokenizer, TokenizerModel};
