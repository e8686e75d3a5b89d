//! The progress tracker (C5): the memory of one reasoning run. Survives
//! across strategy escalations, dedupes tool calls by a canonical hash,
//! merges successive plans without losing in-flight work, and renders
//! verbosity-tiered context text back into the prompt.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Strategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Complexity / Evaluation / Plan (LLM-backed helper outputs)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

/// The analyzer's classification of a query, paired with its recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complexity {
    pub level: ComplexityLevel,
    pub recommended_strategy: Strategy,
    pub estimated_iterations: usize,
    pub confidence: f64,
    pub rationale: String,
}

/// The evaluator's opinion on a candidate answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub is_complete: bool,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub additional_queries: Vec<String>,
}

/// A subtask as produced by the planner, before being merged into the
/// tracker's living `PlanSkeleton`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub query: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The planner's raw output for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub original_query: String,
    #[serde(default)]
    pub complexity_analysis: Option<Complexity>,
    pub subtasks: Vec<SubTask>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution attempts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Escalated,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub strategy: Strategy,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub outcome_description: String,
}

impl ExecutionAttempt {
    pub fn start(strategy: Strategy, now: DateTime<Utc>) -> Self {
        Self {
            strategy,
            started_at: now,
            completed_at: None,
            status: AttemptStatus::InProgress,
            response: None,
            evaluation: None,
            quality_score: None,
            outcome_description: String::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution records and the dedupe cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub executed_at: DateTime<Utc>,
    pub strategy_at_time: Strategy,
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub result_hash: String,
}

/// Deterministic hash of `(tool_name, canonical JSON of arguments)`, stable
/// under key reordering in the arguments object.
pub fn hash_tool_call(tool_name: &str, arguments: &serde_json::Value) -> String {
    let canonical = canonicalize(arguments);
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a JSON value with object keys sorted recursively, so that
/// semantically identical argument maps hash identically regardless of
/// field order.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push(':');
                out.push_str(&canonicalize(&map[*k]));
            }
            out.push('}');
            out
        }
        serde_json::Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan skeleton
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub status: PlanStepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub spawned_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSkeleton {
    pub created_at: DateTime<Utc>,
    pub created_by_strategy: Strategy,
    pub query: String,
    pub complexity: Option<Complexity>,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub revision_count: u32,
    pub last_updated: DateTime<Utc>,
}

impl PlanSkeleton {
    pub fn new(plan: &ResearchPlan, strategy: Strategy, now: DateTime<Utc>) -> Self {
        let mut steps = Vec::with_capacity(plan.subtasks.len());
        for (i, sub) in plan.subtasks.iter().enumerate() {
            steps.push(PlanStep {
                id: format!("step_{i}"),
                description: sub.query.clone(),
                status: PlanStepStatus::Pending,
                started_at: None,
                completed_at: None,
                findings: Vec::new(),
                tools_used: Vec::new(),
                depends_on: Vec::new(),
                spawned_from: None,
            });
        }
        // Resolve dependency strings against the freshly created steps.
        for (i, sub) in plan.subtasks.iter().enumerate() {
            if sub.dependencies.is_empty() {
                continue;
            }
            let resolved: Vec<String> = sub
                .dependencies
                .iter()
                .filter_map(|dep| resolve_similar(dep, &steps, i).map(|s| s.id.clone()))
                .collect();
            steps[i].depends_on = resolved;
        }
        Self {
            created_at: now,
            created_by_strategy: strategy,
            query: plan.original_query.clone(),
            complexity: plan.complexity_analysis.clone(),
            steps,
            current_step_id: None,
            revision_count: 0,
            last_updated: now,
        }
    }

    /// Merge a freshly produced plan over this skeleton, per §4.5's
    /// five-step algorithm. Preserved steps (completed/in_progress) are
    /// never reassigned an id or description.
    pub fn merge(&mut self, plan: &ResearchPlan, now: DateTime<Utc>) {
        let (preserved_pairs, mutable_pairs): (Vec<(usize, &PlanStep)>, Vec<(usize, &PlanStep)>) = self
            .steps
            .iter()
            .enumerate()
            .partition(|(_, s)| matches!(s.status, PlanStepStatus::Completed | PlanStepStatus::InProgress));
        let preserved: Vec<usize> = preserved_pairs.into_iter().map(|(i, _)| i).collect();
        let mutable: Vec<usize> = mutable_pairs.into_iter().map(|(i, _)| i).collect();

        let mut matched_mutable: Vec<bool> = vec![false; mutable.len()];
        let mut new_steps: Vec<PlanStep> = Vec::new();
        let mut touched_existing: Vec<usize> = Vec::new();

        for (idx, sub) in plan.subtasks.iter().enumerate() {
            let normalized = normalize_description(&sub.query);

            // (a) reuse a preserved step with the identical normalized description.
            if let Some(&pi) = preserved
                .iter()
                .find(|&&pi| normalize_description(&self.steps[pi].description) == normalized)
            {
                touched_existing.push(pi);
                continue;
            }

            // (b) search mutable steps for Jaccard word-overlap >= 0.7.
            if let Some((mi_pos, &mi)) = mutable.iter().enumerate().find(|&(mi_pos, &mi)| {
                !matched_mutable[mi_pos]
                    && jaccard_overlap(&normalize_description(&self.steps[mi].description), &normalized) >= 0.7
            }) {
                matched_mutable[mi_pos] = true;
                self.steps[mi].description = sub.query.clone();
                touched_existing.push(mi);
                continue;
            }

            // (c) create a fresh step.
            new_steps.push(PlanStep {
                id: format!("step_{idx}_{}", self.revision_count + 1),
                description: sub.query.clone(),
                status: PlanStepStatus::Pending,
                started_at: None,
                completed_at: None,
                findings: Vec::new(),
                tools_used: Vec::new(),
                depends_on: Vec::new(),
                spawned_from: self.current_step_id.clone(),
            });
        }

        // Any remaining unmatched mutable (pending/failed) step is skipped,
        // retained for audit, never resurrected automatically.
        for (mi_pos, &mi) in mutable.iter().enumerate() {
            if !matched_mutable[mi_pos] && !touched_existing.contains(&mi) {
                self.steps[mi].status = PlanStepStatus::Skipped;
            }
        }

        // Resolve dependencies on the new steps against preserved + matched steps.
        let mut combined_for_deps = self.steps.clone();
        combined_for_deps.extend(new_steps.iter().cloned());
        for (idx, sub) in plan.subtasks.iter().enumerate() {
            if sub.dependencies.is_empty() {
                continue;
            }
            let normalized = normalize_description(&sub.query);
            let target_pos = new_steps.iter().position(|s| normalize_description(&s.description) == normalized || s.id == format!("step_{idx}_{}", self.revision_count + 1));
            if let Some(pos) = target_pos {
                let resolved: Vec<String> = sub
                    .dependencies
                    .iter()
                    .filter_map(|dep| resolve_similar(dep, &combined_for_deps, usize::MAX).map(|s| s.id.clone()))
                    .collect();
                new_steps[pos].depends_on = resolved;
            }
        }

        self.steps.extend(new_steps);
        self.revision_count += 1;
        self.last_updated = now;
    }
}

fn normalize_description(s: &str) -> String {
    let lowered = s.to_lowercase();
    let stripped = strip_ordinal_prefix(&lowered);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips leading ordinal/label prefixes like "1.", "step 2:", "- ".
fn strip_ordinal_prefix(s: &str) -> &str {
    let trimmed = s.trim_start();
    let trimmed = trimmed.trim_start_matches(|c: char| c == '-' || c == '*' || c.is_whitespace());
    let mut chars = trimmed.char_indices().peekable();
    let mut digits_end = None;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digits_end = Some(i + c.len_utf8());
            chars.next();
        } else {
            break;
        }
    }
    if let Some(end) = digits_end {
        let rest = &trimmed[end..];
        if let Some(rest2) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(':')).or_else(|| rest.strip_prefix(')')) {
            return rest2.trim_start();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("step ") {
        if let Some(colon) = rest.find(':') {
            return rest[colon + 1..].trim_start();
        }
    }
    trimmed
}

fn jaccard_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn resolve_similar<'a>(dep_desc: &str, steps: &'a [PlanStep], self_idx: usize) -> Option<&'a PlanStep> {
    let normalized = normalize_description(dep_desc);
    steps
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != self_idx)
        .filter(|(_, s)| !matches!(s.status, PlanStepStatus::Skipped))
        .find(|(_, s)| {
            let sd = normalize_description(&s.description);
            sd == normalized || jaccard_overlap(&sd, &normalized) >= 0.7
        })
        .map(|(_, s)| s)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulated insights
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccumulatedInsights {
    #[serde(default)]
    pub confirmed_facts: Vec<String>,
    #[serde(default)]
    pub partial_findings: Vec<String>,
    #[serde(default)]
    pub knowledge_gaps: Vec<String>,
    #[serde(default)]
    pub quality_feedback: Vec<String>,
    #[serde(default)]
    pub recommended_improvements: Vec<String>,
    #[serde(default)]
    pub successful_tool_results: HashMap<String, String>,
    #[serde(default)]
    pub failed_tool_attempts: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context emission verbosity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Minimal,
    Compact,
    Medium,
    Full,
}

const EVAL_REASONING_TRUNCATE_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressTracker {
    pub original_query: String,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    pub attempts: Vec<ExecutionAttempt>,
    pub tool_executions: Vec<ToolExecutionRecord>,
    /// result_hash -> last successful result string.
    #[serde(default)]
    tool_result_cache: HashMap<String, String>,
    #[serde(default)]
    pub plan: Option<PlanSkeleton>,
    #[serde(default)]
    pub insights: AccumulatedInsights,
}

impl ProgressTracker {
    pub fn new(original_query: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            complexity: None,
            attempts: Vec::new(),
            tool_executions: Vec::new(),
            tool_result_cache: HashMap::new(),
            plan: None,
            insights: AccumulatedInsights::default(),
        }
    }

    pub fn start_attempt(&mut self, strategy: Strategy, now: DateTime<Utc>) {
        self.attempts.push(ExecutionAttempt::start(strategy, now));
    }

    pub fn end_attempt(
        &mut self,
        status: AttemptStatus,
        response: Option<String>,
        evaluation: Option<Evaluation>,
        quality_score: Option<f64>,
        outcome_description: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.completed_at = Some(now);
            attempt.status = status;
            attempt.response = response;
            attempt.evaluation = evaluation;
            attempt.quality_score = quality_score;
            attempt.outcome_description = outcome_description.into();
        }
    }

    /// `(execute, cached_result)`. Returns `(false, Some(cached))` on a
    /// cache hit; `(true, None)` on a miss *or* on a prior-failure hit —
    /// failures may be worth retrying in a new context.
    pub fn should_execute_tool(&self, tool_name: &str, arguments: &serde_json::Value) -> (bool, Option<String>) {
        let hash = hash_tool_call(tool_name, arguments);
        match self.tool_result_cache.get(&hash) {
            Some(cached) => (false, Some(cached.clone())),
            None => (true, None),
        }
    }

    pub fn log_tool_execution(
        &mut self,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        strategy: Strategy,
        success: bool,
        result: Option<String>,
        error: Option<String>,
        execution_time_ms: u64,
        now: DateTime<Utc>,
    ) {
        let tool_name = tool_name.into();
        let hash = hash_tool_call(&tool_name, &arguments);
        if success {
            if let Some(r) = &result {
                self.tool_result_cache.insert(hash.clone(), r.clone());
                self.insights
                    .successful_tool_results
                    .insert(tool_name.clone(), r.clone());
            }
        } else if let Some(e) = &error {
            self.insights
                .failed_tool_attempts
                .insert(tool_name.clone(), e.clone());
        }
        self.tool_executions.push(ToolExecutionRecord {
            tool_name,
            arguments,
            executed_at: now,
            strategy_at_time: strategy,
            success,
            result,
            error,
            execution_time_ms,
            result_hash: hash,
        });
    }

    /// Set the initial plan (first attempt) or merge over the existing
    /// skeleton (re-entry), per §4.5.
    pub fn set_plan(&mut self, plan: &ResearchPlan, strategy: Strategy, now: DateTime<Utc>) {
        match &mut self.plan {
            None => self.plan = Some(PlanSkeleton::new(plan, strategy, now)),
            Some(skeleton) => skeleton.merge(plan, now),
        }
    }

    pub fn mark_step(&mut self, step_id: &str, status: PlanStepStatus, now: DateTime<Utc>) {
        if let Some(plan) = &mut self.plan {
            if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
                if status == PlanStepStatus::InProgress {
                    step.started_at.get_or_insert(now);
                    plan.current_step_id = Some(step_id.to_string());
                }
                if matches!(status, PlanStepStatus::Completed | PlanStepStatus::Failed) {
                    step.completed_at = Some(now);
                }
                step.status = status;
            }
        }
    }

    /// Derives the appropriate verbosity for a strategy when unspecified:
    /// MINIMAL on first attempt, COMPACT before a DIRECT re-entry, MEDIUM
    /// for LIGHT, FULL for DEEP.
    pub fn default_verbosity(&self, strategy: Strategy) -> Verbosity {
        if self.attempts.is_empty() {
            return Verbosity::Minimal;
        }
        match strategy {
            Strategy::Direct => Verbosity::Compact,
            Strategy::LightPlanning => Verbosity::Medium,
            Strategy::DeepReasoning => Verbosity::Full,
        }
    }

    /// Render a human-prose progress report at the given (or derived)
    /// verbosity, per the §4.5 emission table.
    pub fn to_context_text(
        &self,
        strategy: Strategy,
        verbosity: Option<Verbosity>,
        max_attempts: Option<usize>,
        max_tools: Option<usize>,
    ) -> String {
        let verbosity = verbosity.unwrap_or_else(|| self.default_verbosity(strategy));
        let mut out = String::new();

        out.push_str(&format!("Query: {}\n", self.original_query));
        if let Some(c) = &self.complexity {
            out.push_str(&format!("Complexity: {:?} (confidence {:.2})\n", c.level, c.confidence));
        }
        if verbosity == Verbosity::Minimal {
            return out;
        }

        let attempts_window = max_attempts.unwrap_or(self.attempts.len()).min(self.attempts.len());
        if verbosity >= Verbosity::Medium && attempts_window > 0 {
            out.push_str("Recent attempts:\n");
            let start = self.attempts.len() - attempts_window;
            for a in &self.attempts[start..] {
                out.push_str(&format!(
                    "  {:?} -> {:?}{}\n",
                    a.strategy,
                    a.status,
                    a.quality_score.map(|q| format!(" (quality {q:.2})")).unwrap_or_default()
                ));
            }
        }

        let n_attempts = self.attempts.len();
        let n_tools = self.tool_executions.len();
        let (completed_steps, total_steps) = self
            .plan
            .as_ref()
            .map(|p| {
                (
                    p.steps.iter().filter(|s| s.status == PlanStepStatus::Completed).count(),
                    p.steps.len(),
                )
            })
            .unwrap_or((0, 0));
        out.push_str(&format!(
            "Progress: {n_attempts} attempt(s), {n_tools} tool call(s), {completed_steps}/{total_steps} plan step(s) complete\n"
        ));

        let gaps_limit = match verbosity {
            Verbosity::Compact => 3,
            Verbosity::Medium => 5,
            _ => usize::MAX,
        };
        let top_gaps: Vec<&String> = self.insights.knowledge_gaps.iter().take(gaps_limit).collect();
        if !top_gaps.is_empty() {
            out.push_str("Known gaps:\n");
            for g in &top_gaps {
                out.push_str(&format!("  - {g}\n"));
            }
        }
        out.push_str(&format!("Cached tool results: {}\n", self.tool_result_cache.len()));

        if verbosity == Verbosity::Compact {
            return out;
        }

        // MEDIUM and FULL: plan steps, tool summary, feedback.
        if let Some(plan) = &self.plan {
            let completed_window = if verbosity == Verbosity::Full { plan.steps.len() } else { 5 };
            let completed: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|s| s.status == PlanStepStatus::Completed)
                .collect();
            let start = completed.len().saturating_sub(completed_window);
            if !completed.is_empty() {
                out.push_str("Completed steps:\n");
                for s in &completed[start..] {
                    out.push_str(&format!("  [{}] {}\n", s.id, s.description));
                }
            }

            let pending_window = if verbosity == Verbosity::Full { plan.steps.len() } else { 10 };
            let pending: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|s| s.status == PlanStepStatus::Pending)
                .take(pending_window)
                .collect();
            if !pending.is_empty() {
                out.push_str("Pending steps:\n");
                for s in &pending {
                    out.push_str(&format!("  [{}] {}\n", s.id, s.description));
                }
            }
        }

        let tools_window = if verbosity == Verbosity::Full { 50 } else { 20 };
        let limit = max_tools.unwrap_or(tools_window).min(tools_window);
        let mut by_name: HashMap<&str, (usize, usize)> = HashMap::new();
        let start = self.tool_executions.len().saturating_sub(limit);
        for rec in &self.tool_executions[start..] {
            let entry = by_name.entry(rec.tool_name.as_str()).or_insert((0, 0));
            entry.0 += 1;
            if rec.success {
                entry.1 += 1;
            }
        }
        if !by_name.is_empty() {
            out.push_str("Tool usage (recent):\n");
            let mut names: Vec<&&str> = by_name.keys().collect();
            names.sort();
            for name in names {
                let (total, ok) = by_name[name];
                out.push_str(&format!("  {name}: {ok}/{total} succeeded\n"));
            }
        }

        let feedback_window = if verbosity == Verbosity::Full { self.insights.quality_feedback.len() } else { 3 };
        let feedback_start = self.insights.quality_feedback.len().saturating_sub(feedback_window);
        if !self.insights.quality_feedback.is_empty() {
            out.push_str("Quality feedback:\n");
            for f in &self.insights.quality_feedback[feedback_start..] {
                out.push_str(&format!("  - {}\n", truncate_below_full(f, verbosity)));
            }
        }

        out
    }

    /// Rebuild the tool cache from the execution log, used by `from_dict`
    /// round-trips so that post-deserialization `should_execute_tool` sees
    /// every previously cached input.
    pub fn rebuild_cache(&mut self) {
        self.tool_result_cache.clear();
        for rec in &self.tool_executions {
            if rec.success {
                if let Some(r) = &rec.result {
                    self.tool_result_cache.insert(rec.result_hash.clone(), r.clone());
                }
            }
        }
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut tracker: ProgressTracker = serde_json::from_value(value)?;
        tracker.rebuild_cache();
        Ok(tracker)
    }
}

fn truncate_below_full(s: &str, verbosity: Verbosity) -> String {
    if verbosity == Verbosity::Full || s.len() <= EVAL_REASONING_TRUNCATE_CHARS {
        s.to_string()
    } else {
        format!("{}...", &s[..EVAL_REASONING_TRUNCATE_CHARS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn hash_is_stable_under_key_reordering() {
        let a = serde_json::json!({"k1": "v1", "k2": "v2"});
        let b = serde_json::json!({"k2": "v2", "k1": "v1"});
        assert_eq!(hash_tool_call("tool", &a), hash_tool_call("tool", &b));
    }

    #[test]
    fn should_execute_tool_cache_hit_and_miss() {
        let mut t1 = ProgressTracker::new("q");
        let args = serde_json::json!({"msg": "x"});
        let (exec, cached) = t1.should_execute_tool("echo", &args);
        assert!(exec);
        assert!(cached.is_none());

        t1.log_tool_execution(
            "echo",
            args.clone(),
            Strategy::Direct,
            true,
            Some("x".into()),
            None,
            5,
            t(0),
        );

        let (exec, cached) = t1.should_execute_tool("echo", &args);
        assert!(!exec);
        assert_eq!(cached.as_deref(), Some("x"));
    }

    #[test]
    fn failure_hit_still_allows_retry() {
        let mut t1 = ProgressTracker::new("q");
        let args = serde_json::json!({"msg": "x"});
        t1.log_tool_execution(
            "echo",
            args.clone(),
            Strategy::Direct,
            false,
            None,
            Some("boom".into()),
            5,
            t(0),
        );
        let (exec, cached) = t1.should_execute_tool("echo", &args);
        assert!(exec);
        assert!(cached.is_none());
    }

    #[test]
    fn round_trip_rebuilds_cache() {
        let mut t1 = ProgressTracker::new("q");
        let args = serde_json::json!({"msg": "x"});
        t1.log_tool_execution("echo", args.clone(), Strategy::Direct, true, Some("x".into()), None, 5, t(0));

        let dict = t1.to_dict();
        let restored = ProgressTracker::from_dict(dict).unwrap();
        let (exec, cached) = restored.should_execute_tool("echo", &args);
        assert!(!exec);
        assert_eq!(cached.as_deref(), Some("x"));
    }

    #[test]
    fn plan_merge_preserves_completed_and_in_progress_steps() {
        let plan = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![
                SubTask { query: "Step A".into(), dependencies: vec![] },
                SubTask { query: "Step B".into(), dependencies: vec![] },
                SubTask { query: "Step C".into(), dependencies: vec![] },
            ],
        };
        let mut tracker = ProgressTracker::new("q");
        tracker.set_plan(&plan, Strategy::DeepReasoning, t(0));
        tracker.mark_step("step_0", PlanStepStatus::Completed, t(1));

        let plan2 = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![
                SubTask { query: "Step A".into(), dependencies: vec![] },
                SubTask { query: "Step B revised".into(), dependencies: vec![] },
                SubTask { query: "Step D (new)".into(), dependencies: vec![] },
            ],
        };
        tracker.set_plan(&plan2, Strategy::DeepReasoning, t(2));

        let plan = tracker.plan.unwrap();
        let a = plan.steps.iter().find(|s| s.id == "step_0").unwrap();
        assert_eq!(a.status, PlanStepStatus::Completed);
        assert_eq!(a.description, "Step A");
        assert_eq!(plan.revision_count, 1);
    }

    #[test]
    fn plan_merge_skips_dropped_pending_step() {
        let plan = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![SubTask { query: "Totally unrelated thing".into(), dependencies: vec![] }],
        };
        let mut tracker = ProgressTracker::new("q");
        tracker.set_plan(&plan, Strategy::DeepReasoning, t(0));

        let plan2 = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![SubTask { query: "Something entirely different instead".into(), dependencies: vec![] }],
        };
        tracker.set_plan(&plan2, Strategy::DeepReasoning, t(1));

        let plan = tracker.plan.unwrap();
        let original = plan.steps.iter().find(|s| s.id == "step_0").unwrap();
        assert_eq!(original.status, PlanStepStatus::Skipped);
    }

    #[test]
    fn reingesting_identical_plan_only_bumps_revision_and_timestamp() {
        let plan = ResearchPlan {
            original_query: "q".into(),
            complexity_analysis: None,
            subtasks: vec![SubTask { query: "Do the thing".into(), dependencies: vec![] }],
        };
        let mut tracker = ProgressTracker::new("q");
        tracker.set_plan(&plan, Strategy::DeepReasoning, t(0));
        let before = tracker.plan.clone().unwrap();

        tracker.set_plan(&plan, Strategy::DeepReasoning, t(5));
        let after = tracker.plan.clone().unwrap();

        assert_eq!(after.revision_count, before.revision_count + 1);
        assert_eq!(after.steps.len(), before.steps.len());
        assert_eq!(after.steps[0].id, before.steps[0].id);
        assert_eq!(after.steps[0].description, before.steps[0].description);
    }

    #[test]
    fn context_text_minimal_has_no_sections() {
        let tracker = ProgressTracker::new("what is rust");
        let text = tracker.to_context_text(Strategy::Direct, Some(Verbosity::Minimal), None, None);
        assert!(text.contains("what is rust"));
        assert!(!text.contains("Progress:"));
    }

    #[test]
    fn context_text_compact_is_single_summary_line_plus_gaps() {
        let mut tracker = ProgressTracker::new("q");
        tracker.start_attempt(Strategy::Direct, t(0));
        tracker.insights.knowledge_gaps = vec!["gap1".into(), "gap2".into()];
        let text = tracker.to_context_text(Strategy::Direct, Some(Verbosity::Compact), None, None);
        assert!(text.contains("1 attempt(s)"));
        assert!(text.contains("gap1"));
        assert!(!text.contains("Completed steps:"));
    }

    #[test]
    fn context_text_medium_caps_gaps_at_five() {
        let mut tracker = ProgressTracker::new("q");
        tracker.start_attempt(Strategy::Direct, t(0));
        tracker.insights.knowledge_gaps = (0..8).map(|i| format!("gap{i}")).collect();
        let text = tracker.to_context_text(Strategy::Direct, Some(Verbosity::Medium), None, None);
        let gap_lines = text.lines().filter(|l| l.trim_start().starts_with("- gap")).count();
        assert_eq!(gap_lines, 5);
        assert!(text.contains("gap0"));
        assert!(text.contains("gap4"));
        assert!(!text.contains("gap5"));
    }

    #[test]
    fn context_text_full_lists_every_gap_exactly_once() {
        let mut tracker = ProgressTracker::new("q");
        tracker.start_attempt(Strategy::Direct, t(0));
        tracker.insights.knowledge_gaps = (0..8).map(|i| format!("gap{i}")).collect();
        let text = tracker.to_context_text(Strategy::Direct, Some(Verbosity::Full), None, None);
        let gap_lines = text.lines().filter(|l| l.trim_start().starts_with("- gap")).count();
        assert_eq!(gap_lines, 8);
        assert!(text.contains("gap7"));
        assert_eq!(text.matches("Known gaps:").count(), 1);
        assert!(!text.contains("All knowledge gaps:"));
    }

    #[test]
    fn default_verbosity_escalates_with_strategy() {
        let mut tracker = ProgressTracker::new("q");
        assert_eq!(tracker.default_verbosity(Strategy::Direct), Verbosity::Minimal);
        tracker.start_attempt(Strategy::Direct, t(0));
        assert_eq!(tracker.default_verbosity(Strategy::Direct), Verbosity::Compact);
        assert_eq!(tracker.default_verbosity(Strategy::LightPlanning), Verbosity::Medium);
        assert_eq!(tracker.default_verbosity(Strategy::DeepReasoning), Verbosity::Full);
    }
}
