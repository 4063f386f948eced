// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Token counting for chunking and content segmentation.
//!
//! Heading content is chunked by token count during ingestion and segmented
//! before extraction, so both paths share this trait-based abstraction.
//!
//! # Example
//!
//! ```
//! use planweave::llm::tokenizer::{Tokenizer, TiktokenTokenizer, TokenizerModel};
//!
//! let tokenizer = TiktokenTokenizer::new(TokenizerModel::Gpt4o).unwrap();
//! let count = tokenizer.count_tokens("Hello, world!");
//! ```

use crate::utils::error::PlanweaveError;
use tiktoken_rs::{cl100k_base, o200k_base};

/// Trait for counting tokens in text.
///
/// Different LLM backends use different tokenization schemes. This trait
/// provides a unified interface for token counting across backends.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Model types that determine which encoding to use for tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerModel {
    /// GPT-4, GPT-3.5-turbo, text-embedding-3-* (uses cl100k_base)
    Gpt4,
    /// GPT-4o, GPT-4o-mini (uses o200k_base)
    Gpt4o,
}

impl TokenizerModel {
    /// Select the appropriate encoding from a model name string.
    pub fn from_model_name(model: &str) -> Self {
        let model_lower = model.to_lowercase();

        // GPT-4o variants use o200k_base
        if model_lower.contains("gpt-4o") || model_lower.contains("o1") {
            return Self::Gpt4o;
        }

        // cl100k_base is a reasonable approximation for everything else,
        // including local models served through Ollama
        Self::Gpt4
    }
}

/// Tokenizer using tiktoken encodings.
pub struct TiktokenTokenizer {
    encoding: tiktoken_rs::CoreBPE,
}

impl TiktokenTokenizer {
    /// Create a new tiktoken tokenizer for the specified model type.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding cannot be loaded.
    pub fn new(model: TokenizerModel) -> Result<Self, PlanweaveError> {
        let encoding = match model {
            TokenizerModel::Gpt4 => {
                cl100k_base().map_err(|e| PlanweaveError::Config(e.to_string()))?
            }
            TokenizerModel::Gpt4o => {
                o200k_base().map_err(|e| PlanweaveError::Config(e.to_string()))?
            }
        };

        Ok(Self { encoding })
    }

    /// Create a tiktoken tokenizer from a model name string.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding cannot be loaded.
    pub fn from_model_name(model_name: &str) -> Result<Self, PlanweaveError> {
        let model = TokenizerModel::from_model_name(model_name);
        Self::new(model)
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_counts_nonzero() {
        let tokenizer = TiktokenTokenizer::new(TokenizerModel::Gpt4).unwrap();
        assert!(tokenizer.count_tokens("Activate the emergency operations center.") > 0);
        assert_eq!(tokenizer.count_tokens(""), 0);
    }

    #[test]
    fn test_model_selection_from_name() {
        assert_eq!(
            TokenizerModel::from_model_name("gpt-4o-mini"),
            TokenizerModel::Gpt4o
        );
        assert_eq!(
            TokenizerModel::from_model_name("llama3.1:70b"),
            TokenizerModel::Gpt4
        );
        assert_eq!(
            TokenizerModel::from_model_name("text-embedding-3-small"),
            TokenizerModel::Gpt4
        );
    }

    #[test]
    fn test_longer_text_has_more_tokens() {
        let tokenizer = TiktokenTokenizer::new(TokenizerModel::Gpt4o).unwrap();
        let short = tokenizer.count_tokens("Notify the triage lead.");
        let long = tokenizer.count_tokens(
            "Notify the triage lead, verify bed availability in the surge ward, \
             and report headcount to the incident commander within fifteen minutes.",
        );
        assert!(long > short);
    }
}
