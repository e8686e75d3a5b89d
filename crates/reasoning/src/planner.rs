//! Produces the step-by-step `ResearchPlan` that LIGHT and DEEP strategies
//! execute against, per §4.7. A plan with no subtasks is a valid outcome —
//! the scheduler treats it as "nothing to plan, fall back to direct" for
//! that attempt rather than an error.

use std::sync::Arc;

use sa_domain::capability::ModelRole;
use sa_domain::config::Strategy;
use sa_domain::tool::Message;
use sa_domain::tracker::{Complexity, ResearchPlan, SubTask};
use sa_providers::{ChatRequest, LlmRouter};
use serde::Deserialize;

use crate::cost::CostCalculator;

pub struct Planner {
    router: Arc<LlmRouter>,
    cost: CostCalculator,
}

impl Planner {
    pub fn new(router: Arc<LlmRouter>, cost: CostCalculator) -> Self {
        Self { router, cost }
    }

    /// Returns the plan and the dollar cost of producing it. An empty
    /// `subtasks` list (on LLM failure, unparseable output, or a genuine "no
    /// decomposition needed" judgment) is deliberately not distinguished
    /// from a real empty plan — callers branch on `subtasks.is_empty()`.
    pub async fn create_plan(
        &self,
        query: &str,
        complexity: &Complexity,
        strategy: Strategy,
        context: Option<&str>,
    ) -> (ResearchPlan, f64) {
        let req = ChatRequest {
            messages: vec![Message::user(planning_prompt(query, complexity, strategy, context))],
            tools: vec![],
            temperature: Some(0.2),
            max_tokens: Some(800),
            json_mode: true,
            model: None,
        };

        match self.router.chat_for_role(ModelRole::Planner, req).await {
            Ok(resp) => {
                let cost = resp
                    .usage
                    .as_ref()
                    .map(|u| self.cost.calculate_cost(&resp.model, u))
                    .unwrap_or(0.0);
                let subtasks = parse_subtasks(&resp.content).unwrap_or_else(|| {
                    tracing::warn!("planner returned unparseable JSON, producing an empty plan");
                    Vec::new()
                });
                (
                    ResearchPlan {
                        original_query: query.to_string(),
                        complexity_analysis: Some(complexity.clone()),
                        subtasks,
                    },
                    cost,
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "planner LLM call failed, producing an empty plan");
                (
                    ResearchPlan { original_query: query.to_string(), complexity_analysis: Some(complexity.clone()), subtasks: Vec::new() },
                    0.0,
                )
            }
        }
    }
}

fn planning_prompt(query: &str, complexity: &Complexity, strategy: Strategy, context: Option<&str>) -> String {
    let step_hint = match strategy {
        Strategy::LightPlanning => "Produce 1 to 3 short, independent steps.",
        Strategy::DeepReasoning => "Produce as many steps as genuinely needed, each depending only on steps it truly requires.",
        Strategy::Direct => "Produce zero or one step only.",
    };
    let context_block = context.map(|c| format!("\n\nPrior progress:\n{c}")).unwrap_or_default();
    format!(
        "Break the following query into a research plan for a tool-using agent. \
         Estimated complexity: {level:?} ({iterations} iterations estimated). {step_hint}\n\n\
         Query: {query}{context_block}\n\n\
         Respond with JSON only, matching this shape:\n\
         {{\"subtasks\": [{{\"query\": \"<step query>\", \"dependencies\": [\"<exact query text of a prior step this depends on>\", ...]}}, ...]}}",
        level = complexity.level,
        iterations = complexity.estimated_iterations,
    )
}

#[derive(Deserialize)]
struct RawSubtask {
    query: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct RawPlan {
    subtasks: Vec<RawSubtask>,
}

fn parse_subtasks(text: &str) -> Option<Vec<SubTask>> {
    let json_slice = crate::json_extract::extract_json_object(text)?;
    let raw: RawPlan = serde_json::from_str(json_slice).ok()?;
    Some(
        raw.subtasks
            .into_iter()
            .map(|s| SubTask { query: s.query, dependencies: s.dependencies })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tracker::ComplexityLevel;

    fn complexity() -> Complexity {
        Complexity {
            level: ComplexityLevel::Complex,
            recommended_strategy: Strategy::DeepReasoning,
            estimated_iterations: 3,
            confidence: 0.8,
            rationale: "test".into(),
        }
    }

    #[test]
    fn parse_subtasks_accepts_well_formed_json() {
        let text = r#"{"subtasks": [{"query": "find x", "dependencies": []}, {"query": "use x to find y", "dependencies": ["find x"]}]}"#;
        let subtasks = parse_subtasks(text).unwrap();
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[1].dependencies, vec!["find x".to_string()]);
    }

    #[test]
    fn parse_subtasks_rejects_garbage() {
        assert!(parse_subtasks("not json").is_none());
    }

    #[test]
    fn planning_prompt_mentions_strategy_specific_hint() {
        let prompt = planning_prompt("q", &complexity(), Strategy::LightPlanning, None);
        assert!(prompt.contains("1 to 3"));
    }

    #[test]
    fn planning_prompt_includes_prior_context_when_given() {
        let prompt = planning_prompt("q", &complexity(), Strategy::DeepReasoning, Some("step 1 found nothing"));
        assert!(prompt.contains("step 1 found nothing"));
    }
}
