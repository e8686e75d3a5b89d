//! A pure function of `(model, usage) -> dollars`, wrapping the per-model
//! pricing table already carried on `LlmConfig`. The scheduler adds each
//! response's cost to either the session's `reasoning_cost` (its own
//! analyzer/evaluator/planner/synthesizer calls) or `conversation_cost`
//! (the agent loop's main turns) — this type just does the arithmetic.

use std::collections::HashMap;

use sa_domain::config::ModelPricing;
use sa_domain::stream::Usage;

#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    pricing: HashMap<String, ModelPricing>,
}

impl CostCalculator {
    pub fn new(pricing: HashMap<String, ModelPricing>) -> Self {
        Self { pricing }
    }

    /// Dollars for `usage` against `model`. Unpriced models cost nothing —
    /// a missing price entry is a config gap, not a billing error worth
    /// failing the run over.
    pub fn calculate_cost(&self, model: &str, usage: &Usage) -> f64 {
        self.pricing
            .get(model)
            .map(|p| p.estimate_cost(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn priced_model_computes_cost() {
        let mut pricing = HashMap::new();
        pricing.insert(
            "gpt-4o".to_string(),
            ModelPricing { input_per_1m: 5.0, output_per_1m: 15.0 },
        );
        let calc = CostCalculator::new(pricing);
        let cost = calc.calculate_cost("gpt-4o", &usage(1000, 500));
        assert!((cost - (1000.0 * 5.0 + 500.0 * 15.0) / 1_000_000.0).abs() < 1e-12);
    }

    #[test]
    fn unpriced_model_costs_nothing() {
        let calc = CostCalculator::default();
        assert_eq!(calc.calculate_cost("unknown-model", &usage(1000, 500)), 0.0);
    }
}
