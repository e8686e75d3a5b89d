//! Judges whether a strategy's response actually answers the query, per
//! §4.7's quality gate. Runs after every attempt, DIRECT, LIGHT and DEEP
//! alike — the scheduler decides what to do with the verdict.

use std::sync::Arc;

use sa_domain::capability::ModelRole;
use sa_domain::config::Strategy;
use sa_domain::tool::Message;
use sa_domain::tracker::{Complexity, Evaluation};
use sa_providers::{ChatRequest, LlmRouter};
use serde::Deserialize;

use crate::cost::CostCalculator;

pub struct Evaluator {
    router: Arc<LlmRouter>,
    cost: CostCalculator,
}

impl Evaluator {
    pub fn new(router: Arc<LlmRouter>, cost: CostCalculator) -> Self {
        Self { router, cost }
    }

    /// Returns the evaluation and the dollar cost of producing it. On any
    /// failure to get or parse a judgment, returns the conservative default
    /// (`is_complete: false, confidence: 0.0`) rather than guessing the
    /// answer was good enough — an unparseable verdict should never look
    /// like a pass.
    pub async fn evaluate(
        &self,
        query: &str,
        response: &str,
        strategy: Strategy,
        complexity: &Complexity,
    ) -> (Evaluation, f64) {
        let req = ChatRequest {
            messages: vec![Message::user(judgment_prompt(query, response, strategy, complexity))],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(400),
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
                let evaluation = parse_evaluation(&resp.content).unwrap_or_else(|| {
                    tracing::warn!("evaluator returned unparseable JSON, treating as incomplete");
                    Evaluation::default()
                });
                (evaluation, cost)
            }
            Err(e) => {
                tracing::warn!(error = %e, "evaluator LLM call failed, treating as incomplete");
                (Evaluation::default(), 0.0)
            }
        }
    }
}

fn judgment_prompt(query: &str, response: &str, strategy: Strategy, complexity: &Complexity) -> String {
    format!(
        "A {strategy:?} agent (complexity: {level:?}) answered the query below. \
         Judge whether the answer fully addresses the query.\n\n\
         Query: {query}\n\nAnswer: {response}\n\n\
         Respond with JSON only, matching this shape:\n\
         {{\"is_complete\": <bool>, \"confidence\": <0.0-1.0>, \"reasoning\": \"<short reason>\", \
         \"missing_aspects\": [<string>, ...], \"additional_queries\": [<string>, ...]}}",
        level = complexity.level,
    )
}

#[derive(Deserialize)]
struct RawEvaluation {
    is_complete: bool,
    confidence: f64,
    reasoning: String,
    #[serde(default)]
    missing_aspects: Vec<String>,
    #[serde(default)]
    additional_queries: Vec<String>,
}

fn parse_evaluation(text: &str) -> Option<Evaluation> {
    let json_slice = crate::json_extract::extract_json_object(text)?;
    let raw: RawEvaluation = serde_json::from_str(json_slice).ok()?;
    Some(Evaluation {
        is_complete: raw.is_complete,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reasoning: raw.reasoning,
        missing_aspects: raw.missing_aspects,
        additional_queries: raw.additional_queries,
    })
}
