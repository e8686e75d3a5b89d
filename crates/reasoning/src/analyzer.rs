//! Query-complexity classification: the first thing the scheduler does with
//! a new query. Prefers an LLM judgment (cheap model, strict JSON) but never
//! blocks a run on it — a malformed or missing response falls back to a
//! heuristic so the scheduler always has a `Complexity` to start from.

use std::sync::Arc;

use sa_domain::capability::ModelRole;
use sa_domain::config::Strategy;
use sa_domain::tool::Message;
use sa_domain::tracker::{Complexity, ComplexityLevel};
use sa_providers::{ChatRequest, LlmRouter};
use serde::Deserialize;

use crate::cost::CostCalculator;

pub struct Analyzer {
    router: Arc<LlmRouter>,
    cost: CostCalculator,
}

impl Analyzer {
    pub fn new(router: Arc<LlmRouter>, cost: CostCalculator) -> Self {
        Self { router, cost }
    }

    /// Returns the classification and the dollar cost of producing it (0.0
    /// on fallback, since no LLM call succeeded).
    pub async fn analyze(&self, query: &str) -> (Complexity, f64) {
        let req = ChatRequest {
            messages: vec![Message::user(classification_prompt(query))],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(300),
            json_mode: true,
            model: None,
        };

        match self.router.chat_for_role(ModelRole::Summarizer, req).await {
            Ok(resp) => {
                let cost = resp
                    .usage
                    .as_ref()
                    .map(|u| self.cost.calculate_cost(&resp.model, u))
                    .unwrap_or(0.0);
                match parse_complexity(&resp.content) {
                    Some(c) => (c, cost),
                    None => {
                        tracing::warn!("analyzer returned unparseable JSON, falling back to heuristic");
                        (heuristic_complexity(query), cost)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "analyzer LLM call failed, falling back to heuristic");
                (heuristic_complexity(query), 0.0)
            }
        }
    }
}

fn classification_prompt(query: &str) -> String {
    format!(
        "Classify the complexity of the following user query for an agent that can plan and call tools.\n\n\
         Query: {query}\n\n\
         Respond with JSON only, matching this shape:\n\
         {{\"level\": \"simple\"|\"medium\"|\"complex\", \
         \"recommended_strategy\": \"direct\"|\"light_planning\"|\"deep_reasoning\", \
         \"estimated_iterations\": <integer>, \"confidence\": <0.0-1.0>, \"rationale\": \"<short reason>\"}}"
    )
}

#[derive(Deserialize)]
struct RawComplexity {
    level: String,
    recommended_strategy: String,
    estimated_iterations: usize,
    confidence: f64,
    rationale: String,
}

fn parse_complexity(text: &str) -> Option<Complexity> {
    let json_slice = crate::json_extract::extract_json_object(text)?;
    let raw: RawComplexity = serde_json::from_str(json_slice).ok()?;
    Some(Complexity {
        level: parse_level(&raw.level)?,
        recommended_strategy: parse_strategy(&raw.recommended_strategy)?,
        estimated_iterations: raw.estimated_iterations,
        confidence: raw.confidence.clamp(0.0, 1.0),
        rationale: raw.rationale,
    })
}

fn parse_level(s: &str) -> Option<ComplexityLevel> {
    match s {
        "simple" => Some(ComplexityLevel::Simple),
        "medium" => Some(ComplexityLevel::Medium),
        "complex" => Some(ComplexityLevel::Complex),
        _ => None,
    }
}

fn parse_strategy(s: &str) -> Option<Strategy> {
    match s {
        "direct" => Some(Strategy::Direct),
        "light_planning" => Some(Strategy::LightPlanning),
        "deep_reasoning" => Some(Strategy::DeepReasoning),
        _ => None,
    }
}

/// Word-count heuristic used when the classifier model is unavailable or
/// returns something unparseable. Deliberately conservative: short queries
/// go DIRECT, everything else escalates rather than risk an incomplete
/// answer on something that needed planning.
fn heuristic_complexity(query: &str) -> Complexity {
    let word_count = query.split_whitespace().count();
    let (level, recommended_strategy, estimated_iterations) = if word_count <= 8 {
        (ComplexityLevel::Simple, Strategy::Direct, 1)
    } else if word_count <= 30 {
        (ComplexityLevel::Medium, Strategy::LightPlanning, 2)
    } else {
        (ComplexityLevel::Complex, Strategy::DeepReasoning, 3)
    };
    Complexity {
        level,
        recommended_strategy,
        estimated_iterations,
        confidence: 0.4,
        rationale: "heuristic fallback: classifier model unavailable or returned invalid JSON".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_complexity_accepts_well_formed_json() {
        let text = r#"{"level": "complex", "recommended_strategy": "deep_reasoning", "estimated_iterations": 4, "confidence": 0.9, "rationale": "multi-part question"}"#;
        let c = parse_complexity(text).unwrap();
        assert_eq!(c.level, ComplexityLevel::Complex);
        assert_eq!(c.recommended_strategy, Strategy::DeepReasoning);
        assert_eq!(c.estimated_iterations, 4);
    }

    #[test]
    fn parse_complexity_rejects_garbage() {
        assert!(parse_complexity("not json at all").is_none());
    }

    #[test]
    fn parse_complexity_extracts_json_embedded_in_prose() {
        let text = "Sure, here's my answer:\n{\"level\": \"simple\", \"recommended_strategy\": \"direct\", \"estimated_iterations\": 1, \"confidence\": 0.8, \"rationale\": \"trivial\"}\nHope that helps!";
        let c = parse_complexity(text).unwrap();
        assert_eq!(c.level, ComplexityLevel::Simple);
    }

    #[test]
    fn heuristic_escalates_with_query_length() {
        assert_eq!(heuristic_complexity("hi").recommended_strategy, Strategy::Direct);
        assert_eq!(
            heuristic_complexity(&"word ".repeat(15)).recommended_strategy,
            Strategy::LightPlanning
        );
        assert_eq!(
            heuristic_complexity(&"word ".repeat(40)).recommended_strategy,
            Strategy::DeepReasoning
        );
    }
}
