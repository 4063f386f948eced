// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod prompts;
pub mod runtime;

pub use prompts::{AgentPrompt, PromptLibrary};
pub use runtime::{AgentHandle, AgentRuntime, DEFAULT_WORKERS, split_batches};
