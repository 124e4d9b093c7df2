//! LLM usage accounting.
//!
//! Accumulates token counts and an estimated cost over a run. The tracker is
//! shared between concurrently assessed items.

use finreg_core::UsageSummary;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// Accumulated LLM usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,

    /// Billed generation calls, failed attempts included
    pub llm_calls: u64,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens (input, output)
        let (input_rate, output_rate) = match model {
            m if m.contains("opus") => (15.0, 75.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            _ => (0.0, 0.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            llm_calls: self.llm_calls,
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            estimated_cost_usd: self.estimated_cost,
        }
    }
}

/// Shared usage tracker for a run.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: RwLock<LlmUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage of one billed call.
    pub fn record(&self, usage: &TokenUsage, model: &str) {
        self.usage.write().add(usage, model);
    }

    pub fn snapshot(&self) -> LlmUsage {
        self.usage.read().clone()
    }
}
