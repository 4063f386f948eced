//! Cost calculation and tracking for LLM operations.
//!
//! A generation run makes many LLM calls across ten stages; the tracker
//! records token usage per operation so the final report can attribute
//! spend to individual agents and batches.
//!
//! # Example
//!
//! ```
//! use planweave::llm::cost::{CostCalculator, CostTracker};
//! use planweave::llm::provider::Pricing;
//!
//! let pricing = Pricing {
//!     input_per_1k: 0.0025,
//!     output_per_1k: 0.01,
//! };
//! let mut tracker = CostTracker::new(CostCalculator::new(pricing));
//! tracker.add_operation("analyzer_p1", 5000, 800);
//! tracker.add_operation("extractor_batch_0", 3000, 1500);
//!
//! let summary = tracker.summary();
//! assert_eq!(summary.operation_count, 2);
//! ```

use crate::llm::provider::Pricing;
use serde::{Deserialize, Serialize};

/// Cost breakdown for a single operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Name of the operation (e.g., "analyzer_p2_batch_1", "supervisor").
    pub operation: String,
    /// Number of input tokens for this operation.
    pub input_tokens: usize,
    /// Number of output tokens for this operation.
    pub output_tokens: usize,
    /// Cost of this operation in dollars.
    pub cost: f64,
}

/// Calculator for LLM costs based on backend pricing.
///
/// Pricing is specified as dollars per 1,000 tokens; local backends
/// (Ollama) report zero pricing and every cost comes out as 0.0.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    pricing: Pricing,
}

impl CostCalculator {
    /// Creates a new cost calculator with the given pricing.
    #[must_use]
    pub fn new(pricing: Pricing) -> Self {
        Self { pricing }
    }

    /// Returns a reference to the pricing configuration.
    #[must_use]
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// Calculates the cost for a given number of input and output tokens.
    #[must_use]
    pub fn calculate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.pricing.input_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.pricing.output_per_1k;
        input_cost + output_cost
    }
}

/// Tracks costs across multiple LLM operations.
///
/// Operations are kept in insertion order so the final breakdown reads in
/// pipeline order.
#[derive(Debug, Clone)]
pub struct CostTracker {
    calculator: CostCalculator,
    operations: Vec<CostBreakdown>,
}

impl CostTracker {
    /// Creates a new cost tracker with the given calculator.
    #[must_use]
    pub fn new(calculator: CostCalculator) -> Self {
        Self {
            calculator,
            operations: Vec::new(),
        }
    }

    /// Creates a new cost tracker from pricing information.
    #[must_use]
    pub fn from_pricing(pricing: Pricing) -> Self {
        Self::new(CostCalculator::new(pricing))
    }

    /// Adds an operation to the tracker.
    pub fn add_operation(
        &mut self,
        name: impl Into<String>,
        input_tokens: usize,
        output_tokens: usize,
    ) {
        let cost = self.calculator.calculate_cost(input_tokens, output_tokens);
        self.operations.push(CostBreakdown {
            operation: name.into(),
            input_tokens,
            output_tokens,
            cost,
        });
    }

    /// Returns the total cost of all tracked operations.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.operations.iter().map(|op| op.cost).sum()
    }

    /// Returns the total number of input tokens across all operations.
    #[must_use]
    pub fn total_input_tokens(&self) -> usize {
        self.operations.iter().map(|op| op.input_tokens).sum()
    }

    /// Returns the total number of output tokens across all operations.
    #[must_use]
    pub fn total_output_tokens(&self) -> usize {
        self.operations.iter().map(|op| op.output_tokens).sum()
    }

    /// Returns the number of operations tracked.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Returns the breakdown of costs by operation, in insertion order.
    #[must_use]
    pub fn breakdown(&self) -> &[CostBreakdown] {
        &self.operations
    }

    /// Clears all tracked operations.
    pub fn reset(&mut self) {
        self.operations.clear();
    }

    /// Creates a summary of the tracking session.
    #[must_use]
    pub fn summary(&self) -> CostSummary {
        CostSummary {
            total_cost: self.total_cost(),
            total_input_tokens: self.total_input_tokens(),
            total_output_tokens: self.total_output_tokens(),
            operation_count: self.operation_count(),
            operations: self.operations.clone(),
        }
    }
}

/// Summary of costs for a tracking session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total cost in dollars.
    pub total_cost: f64,
    /// Total input tokens across all operations.
    pub total_input_tokens: usize,
    /// Total output tokens across all operations.
    pub total_output_tokens: usize,
    /// Number of operations tracked.
    pub operation_count: usize,
    /// Breakdown by operation.
    pub operations: Vec<CostBreakdown>,
}

impl CostSummary {
    /// Returns the total number of tokens (input + output).
    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.total_input_tokens + self.total_output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_pricing() -> Pricing {
        Pricing {
            input_per_1k: 2.5,
            output_per_1k: 10.0,
        }
    }

    #[test]
    fn test_calculate_cost() {
        let calc = CostCalculator::new(openai_pricing());
        // 1000 input tokens = 2.5, 500 output tokens = 5.0
        let cost = calc.calculate_cost(1000, 500);
        assert!((cost - 7.5).abs() < 0.0001);
    }

    #[test]
    fn test_zero_pricing_is_free() {
        let calc = CostCalculator::new(Pricing {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        });
        assert_eq!(calc.calculate_cost(100_000, 50_000), 0.0);
    }

    #[test]
    fn test_tracker_accumulates_in_order() {
        let mut tracker = CostTracker::from_pricing(openai_pricing());
        tracker.add_operation("orchestrator", 1000, 200);
        tracker.add_operation("analyzer_p1", 2000, 400);

        assert_eq!(tracker.operation_count(), 2);
        assert_eq!(tracker.total_input_tokens(), 3000);
        assert_eq!(tracker.total_output_tokens(), 600);
        assert_eq!(tracker.breakdown()[0].operation, "orchestrator");
        assert_eq!(tracker.breakdown()[1].operation, "analyzer_p1");
    }

    #[test]
    fn test_summary_totals() {
        let mut tracker = CostTracker::from_pricing(openai_pricing());
        tracker.add_operation("selector_batch_0", 1500, 300);
        let summary = tracker.summary();
        assert_eq!(summary.total_tokens(), 1800);
        assert_eq!(summary.operation_count, 1);
    }

    #[test]
    fn test_reset_clears_operations() {
        let mut tracker = CostTracker::from_pricing(openai_pricing());
        tracker.add_operation("dedup_batch_0", 100, 50);
        tracker.reset();
        assert_eq!(tracker.operation_count(), 0);
        assert_eq!(tracker.total_cost(), 0.0);
    }
}
