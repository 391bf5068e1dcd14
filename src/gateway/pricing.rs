//! Judge model pricing.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// OpenRouter list prices, per 1M tokens (input / output):
// gpt-4o-mini     $0.15 / $0.60
// gpt-4o          $2.50 / $10.00
// gpt-4.1-mini    $0.40 / $1.60
// claude-3.5-haiku $0.80 / $4.00
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
const GPT_4O: ModelPricing = ModelPricing::new(2_500, 10_000);
const GPT_41_MINI: ModelPricing = ModelPricing::new(400, 1_600);
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);

/// Used for models missing from the table.
const FALLBACK: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("openai/gpt-4o-mini", GPT_4O_MINI);
    map.insert("openai/gpt-4o-mini-2024-07-18", GPT_4O_MINI);
    map.insert("openai/gpt-4o", GPT_4O);
    map.insert("openai/gpt-4.1-mini", GPT_41_MINI);
    map.insert("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU);
    map
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model_id).copied()
}

/// Cost of one chat call in nanodollars.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(FALLBACK)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        // 1000 * 150 + 1000 * 600
        assert_eq!(chat_cost("openai/gpt-4o-mini", 1_000, 1_000), 750_000);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        assert_eq!(chat_cost("acme/judge-xl", 10, 10), 60_000);
    }
}
