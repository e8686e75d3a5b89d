//! The adaptive Reasoning Scheduler (C7): the outer control loop described
//! in §4.7. Classifies a query's complexity, picks a starting strategy,
//! drives that strategy to a candidate answer via the Agent Loop (C6),
//! judges it, and escalates `DIRECT → LIGHT_PLANNING → DEEP_REASONING`
//! until the quality gate passes or the ceiling strategy is reached.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sa_domain::conversation::Conversation;
use sa_domain::config::{ReasoningConfig, Strategy};
use sa_domain::error::Result;
use sa_domain::tracker::{AttemptStatus, Evaluation, PlanStep, PlanStepStatus, ProgressTracker, Verbosity};

use crate::agent_loop::AgentLoop;
use crate::analyzer::Analyzer;
use crate::callbacks::RuntimeCallbacks;
use crate::evaluator::Evaluator;
use crate::planner::Planner;

/// Outcome of one top-level `run`: the accepted answer, its cost split
/// between the agent loop's own turns and the scheduler's own LLM calls
/// (analyzer/planner/evaluator), and the tracker accumulated along the way
/// (the caller attaches it to the session on completion).
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub text: String,
    pub conversation_cost: f64,
    pub reasoning_cost: f64,
    pub tracker: ProgressTracker,
}

pub struct Scheduler {
    config: ReasoningConfig,
    analyzer: Analyzer,
    planner: Planner,
    evaluator: Evaluator,
    agent_loop: Arc<AgentLoop>,
}

impl Scheduler {
    pub fn new(
        config: ReasoningConfig,
        analyzer: Analyzer,
        planner: Planner,
        evaluator: Evaluator,
        agent_loop: Arc<AgentLoop>,
    ) -> Self {
        Self { config, analyzer, planner, evaluator, agent_loop }
    }

    pub async fn run(
        &self,
        query: &str,
        conversation: &mut Conversation,
        session_id: &str,
        streaming: bool,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<SchedulerOutcome> {
        callbacks.on_analysis_start().await;
        let (complexity, analysis_cost) = self.analyzer.analyze(query).await;
        callbacks.on_analysis_complete(&complexity).await;

        let mut tracker = ProgressTracker::new(query);
        tracker.complexity = Some(complexity.clone());

        let mut strategy = self.config.force_strategy.unwrap_or(complexity.recommended_strategy);
        tracker.start_attempt(strategy, Utc::now());

        let mut conversation_cost = 0.0;
        let mut reasoning_cost = analysis_cost;
        let mut escalated = false;

        loop {
            callbacks
                .on_strategy_selected(strategy, &complexity.rationale)
                .await;

            let (response, step_cost) = self
                .execute_strategy(strategy, query, &complexity, &mut tracker, conversation, session_id, callbacks)
                .await?;
            conversation_cost += step_cost;

            callbacks.on_response_for_judgment(&response, strategy).await;
            callbacks.on_quality_check_start().await;
            let (mut evaluation, eval_cost) = self
                .evaluator
                .evaluate(query, &response, strategy, &complexity)
                .await;
            reasoning_cost += eval_cost;

            let threshold = self.config.threshold(strategy);
            if evaluation.confidence < threshold {
                evaluation.is_complete = false;
            }
            callbacks.on_quality_check_complete(&evaluation).await;

            let accept = evaluation.is_complete || strategy == Strategy::DeepReasoning;
            tracker.end_attempt(
                if accept { AttemptStatus::Completed } else { AttemptStatus::Escalated },
                Some(response.clone()),
                Some(evaluation.clone()),
                Some(evaluation.confidence),
                if accept { "accepted" } else { "quality gate failed, escalating" },
                Utc::now(),
            );

            if accept {
                if streaming {
                    for chunk in fake_chunks(&response, 20) {
                        callbacks.on_stream_chunk(chunk).await;
                        tokio::time::sleep(Duration::from_millis(15)).await;
                    }
                    callbacks.on_stream_complete().await;
                }
                callbacks
                    .on_final_response(strategy, tracker.attempts.len(), evaluation.confidence, escalated)
                    .await;
                return Ok(SchedulerOutcome { text: response, conversation_cost, reasoning_cost, tracker });
            }

            let next = strategy.next().expect("DEEP_REASONING always accepts above");
            callbacks
                .on_auto_escalation(strategy, next, &evaluation.reasoning, evaluation.confidence)
                .await;
            escalated = true;
            strategy = next;
            tracker.start_attempt(strategy, Utc::now());
        }
    }

    async fn execute_strategy(
        &self,
        strategy: Strategy,
        query: &str,
        complexity: &sa_domain::tracker::Complexity,
        tracker: &mut ProgressTracker,
        conversation: &mut Conversation,
        session_id: &str,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<(String, f64)> {
        match strategy {
            Strategy::Direct => self.execute_direct(query, tracker, conversation, session_id, callbacks).await,
            Strategy::LightPlanning => {
                self.execute_light(query, complexity, tracker, conversation, session_id, callbacks).await
            }
            Strategy::DeepReasoning => {
                self.execute_deep(query, complexity, tracker, conversation, session_id, callbacks).await
            }
        }
    }

    /// DIRECT: a single Agent Loop invocation. On a re-entry (this isn't the
    /// attempt that started the run), the tracker's COMPACT context is
    /// prepended so the model knows what already failed.
    async fn execute_direct(
        &self,
        query: &str,
        tracker: &mut ProgressTracker,
        conversation: &mut Conversation,
        session_id: &str,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<(String, f64)> {
        let prompt = if tracker.attempts.len() > 1 {
            format!(
                "{}\n\n{}",
                tracker.to_context_text(Strategy::Direct, Some(Verbosity::Compact), None, None),
                query
            )
        } else {
            query.to_string()
        };
        let outcome = self
            .agent_loop
            .run(&prompt, conversation, Some(tracker), session_id, false, callbacks)
            .await?;
        Ok((outcome.text, outcome.cost))
    }

    /// LIGHT: plan 1-2 steps, run each through the Agent Loop with MEDIUM
    /// context, concatenate the step outputs with no filtering. An empty
    /// plan falls back to a direct turn for this attempt.
    async fn execute_light(
        &self,
        query: &str,
        complexity: &sa_domain::tracker::Complexity,
        tracker: &mut ProgressTracker,
        conversation: &mut Conversation,
        session_id: &str,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<(String, f64)> {
        callbacks.on_planning_start().await;
        let context = tracker.to_context_text(Strategy::LightPlanning, Some(Verbosity::Medium), None, None);
        let (plan, plan_cost) = self
            .planner
            .create_plan(query, complexity, Strategy::LightPlanning, Some(&context))
            .await;
        let mut cost = plan_cost;

        if plan.subtasks.is_empty() {
            callbacks.on_planning_complete(0, "fallback_direct").await;
            let (text, step_cost) = self.execute_direct(query, tracker, conversation, session_id, callbacks).await?;
            return Ok((text, cost + step_cost));
        }

        tracker.set_plan(&plan, Strategy::LightPlanning, Utc::now());
        callbacks.on_planning_complete(plan.subtasks.len(), "light").await;

        let pending_steps = pending_step_ids(tracker);
        let mut outputs = Vec::with_capacity(pending_steps.len());
        for (step_id, description) in pending_steps {
            callbacks.on_step_progress(&step_id, "in_progress", &description).await;
            tracker.mark_step(&step_id, PlanStepStatus::InProgress, Utc::now());

            let step_query = format!(
                "{}\n\n{}",
                tracker.to_context_text(Strategy::LightPlanning, Some(Verbosity::Medium), None, None),
                description
            );
            let outcome = self
                .agent_loop
                .run(&step_query, conversation, Some(tracker), session_id, false, callbacks)
                .await?;
            cost += outcome.cost;
            tracker.mark_step(&step_id, PlanStepStatus::Completed, Utc::now());
            callbacks.on_step_progress(&step_id, "completed", &description).await;
            outputs.push(outcome.text);
        }

        Ok((outputs.join("\n\n"), cost))
    }

    /// DEEP: a full plan, executed step by step up to `max_iterations`
    /// iterations. Each step's output is judged; an evaluator that surfaces
    /// unaddressed `additional_queries` spawns new pending steps. Stops
    /// early once the evaluator calls the accumulated answer complete.
    async fn execute_deep(
        &self,
        query: &str,
        complexity: &sa_domain::tracker::Complexity,
        tracker: &mut ProgressTracker,
        conversation: &mut Conversation,
        session_id: &str,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<(String, f64)> {
        callbacks.on_planning_start().await;
        let context = tracker.to_context_text(Strategy::DeepReasoning, Some(Verbosity::Full), None, None);
        let (plan, plan_cost) = self
            .planner
            .create_plan(query, complexity, Strategy::DeepReasoning, Some(&context))
            .await;
        let mut cost = plan_cost;
        tracker.set_plan(&plan, Strategy::DeepReasoning, Utc::now());
        callbacks.on_planning_complete(plan.subtasks.len(), "deep").await;

        let mut findings: Vec<String> = Vec::new();
        let mut iteration = 0u32;

        while iteration < self.config.max_iterations {
            let Some((step_id, description)) = next_pending_step(tracker) else {
                break;
            };
            iteration += 1;

            callbacks.on_step_progress(&step_id, "in_progress", &description).await;
            tracker.mark_step(&step_id, PlanStepStatus::InProgress, Utc::now());

            let step_query = format!(
                "{}\n\n{}",
                tracker.to_context_text(Strategy::DeepReasoning, Some(Verbosity::Full), None, None),
                description
            );
            let outcome = self
                .agent_loop
                .run(&step_query, conversation, Some(tracker), session_id, false, callbacks)
                .await?;
            cost += outcome.cost;
            tracker.mark_step(&step_id, PlanStepStatus::Completed, Utc::now());
            callbacks.on_step_progress(&step_id, "completed", &description).await;
            findings.push(outcome.text.clone());

            let (step_eval, eval_cost) = self.evaluator.evaluate(query, &outcome.text, Strategy::DeepReasoning, complexity).await;
            cost += eval_cost;

            append_unaddressed_queries(tracker, &step_id, &step_eval);

            if step_eval.is_complete {
                break;
            }
        }

        let synthesized: Vec<&String> = findings.iter().filter(|s| !s.trim().is_empty()).collect();
        let text = if synthesized.is_empty() {
            findings.join("\n\n")
        } else {
            synthesized.into_iter().cloned().collect::<Vec<_>>().join("\n\n")
        };
        Ok((text, cost))
    }
}

/// Ids and descriptions of every currently-pending step, snapshotted before
/// mutation so the caller can iterate while mutating the tracker's plan.
fn pending_step_ids(tracker: &ProgressTracker) -> Vec<(String, String)> {
    tracker
        .plan
        .as_ref()
        .map(|p| {
            p.steps
                .iter()
                .filter(|s| s.status == PlanStepStatus::Pending)
                .map(|s| (s.id.clone(), s.description.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn next_pending_step(tracker: &ProgressTracker) -> Option<(String, String)> {
    tracker.plan.as_ref().and_then(|p| {
        p.steps
            .iter()
            .find(|s| s.status == PlanStepStatus::Pending)
            .map(|s| (s.id.clone(), s.description.clone()))
    })
}

/// Appends a new pending step for every `additional_queries` entry the
/// evaluator surfaced that isn't already covered by an existing step
/// description (exact match after trimming — the tracker's own merge logic
/// already handles fuzzier replan scenarios).
fn append_unaddressed_queries(tracker: &mut ProgressTracker, parent_step_id: &str, evaluation: &Evaluation) {
    let Some(plan) = &mut tracker.plan else { return };
    for addl in &evaluation.additional_queries {
        let already_covered = plan.steps.iter().any(|s| s.description.trim() == addl.trim());
        if already_covered || addl.trim().is_empty() {
            continue;
        }
        let id = format!("step_extra_{}", plan.steps.len());
        plan.steps.push(PlanStep {
            id,
            description: addl.clone(),
            status: PlanStepStatus::Pending,
            started_at: None,
            completed_at: None,
            findings: Vec::new(),
            tools_used: Vec::new(),
            depends_on: Vec::new(),
            spawned_from: Some(parent_step_id.to_string()),
        });
    }
}

fn fake_chunks(text: &str, size: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + size).min(bytes.len());
        while end < bytes.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tracker::{Complexity, ComplexityLevel, ResearchPlan, SubTask};

    fn complexity() -> Complexity {
        Complexity {
            level: ComplexityLevel::Medium,
            recommended_strategy: Strategy::LightPlanning,
            estimated_iterations: 2,
            confidence: 0.7,
            rationale: "test".into(),
        }
    }

    #[test]
    fn pending_step_ids_only_returns_pending() {
        let mut tracker = ProgressTracker::new("q");
        let plan = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![
                SubTask { query: "step a".into(), dependencies: vec![] },
                SubTask { query: "step b".into(), dependencies: vec![] },
            ],
        };
        tracker.set_plan(&plan, Strategy::LightPlanning, Utc::now());
        let ids = pending_step_ids(&tracker);
        assert_eq!(ids.len(), 2);

        let first_id = ids[0].0.clone();
        tracker.mark_step(&first_id, PlanStepStatus::Completed, Utc::now());
        assert_eq!(pending_step_ids(&tracker).len(), 1);
    }

    #[test]
    fn append_unaddressed_queries_skips_duplicates_and_blanks() {
        let mut tracker = ProgressTracker::new("q");
        let plan = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![SubTask { query: "step a".into(), dependencies: vec![] }],
        };
        tracker.set_plan(&plan, Strategy::DeepReasoning, Utc::now());
        let eval = Evaluation {
            is_complete: false,
            confidence: 0.4,
            reasoning: "missing coverage".into(),
            missing_aspects: vec![],
            additional_queries: vec!["step a".into(), "".into(), "step c".into()],
        };
        append_unaddressed_queries(&mut tracker, "step_0", &eval);
        let descriptions: Vec<_> = tracker.plan.unwrap().steps.into_iter().map(|s| s.description).collect();
        assert_eq!(descriptions, vec!["step a", "step c"]);
    }

    #[test]
    fn fake_chunks_roundtrips_text() {
        let text = "the quick brown fox jumps over the lazy dog";
        let chunks = fake_chunks(text, 7);
        assert_eq!(chunks.join(""), text);
    }

    #[test]
    fn complexity_helper_has_expected_defaults() {
        assert_eq!(complexity().recommended_strategy, Strategy::LightPlanning);
    }
}
