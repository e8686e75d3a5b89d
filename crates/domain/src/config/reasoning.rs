use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reasoning scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning for the adaptive reasoning scheduler (strategy selection,
/// quality gates, escalation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Maximum subtask iterations for the deep-reasoning strategy.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// Minimum evaluator confidence to accept a DIRECT attempt.
    #[serde(default = "d_min_quality_direct")]
    pub min_quality_direct: f64,
    /// Minimum evaluator confidence to accept a LIGHT_PLANNING attempt.
    #[serde(default = "d_min_quality_light")]
    pub min_quality_light: f64,
    /// Minimum evaluator confidence to accept a DEEP_REASONING attempt.
    #[serde(default = "d_min_quality_deep")]
    pub min_quality_deep: f64,
    /// Floor below which the evaluator's own confidence is distrusted.
    #[serde(default = "d_min_confidence")]
    pub min_confidence: f64,
    /// When set, forces the *initial* strategy choice; escalation and the
    /// quality gate remain active unless their own thresholds are also
    /// overridden.
    #[serde(default)]
    pub force_strategy: Option<Strategy>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            min_quality_direct: d_min_quality_direct(),
            min_quality_light: d_min_quality_light(),
            min_quality_deep: d_min_quality_deep(),
            min_confidence: d_min_confidence(),
            force_strategy: None,
        }
    }
}

/// Reasoning strategy, ordered `Direct < LightPlanning < DeepReasoning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Direct,
    LightPlanning,
    DeepReasoning,
}

impl Strategy {
    /// The next strategy in the escalation order, or `None` at the ceiling.
    pub fn next(self) -> Option<Strategy> {
        match self {
            Strategy::Direct => Some(Strategy::LightPlanning),
            Strategy::LightPlanning => Some(Strategy::DeepReasoning),
            Strategy::DeepReasoning => None,
        }
    }
}

impl ReasoningConfig {
    /// The configured quality-gate threshold for a given strategy.
    pub fn threshold(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Direct => self.min_quality_direct,
            Strategy::LightPlanning => self.min_quality_light,
            Strategy::DeepReasoning => self.min_quality_deep,
        }
    }
}

fn d_max_iterations() -> u32 {
    3
}
fn d_min_quality_direct() -> f64 {
    0.60
}
fn d_min_quality_light() -> f64 {
    0.65
}
fn d_min_quality_deep() -> f64 {
    0.60
}
fn d_min_confidence() -> f64 {
    0.60
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "d_true")]
    pub enable_caching: bool,
    #[serde(default)]
    pub max_history_messages: Option<usize>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            max_history_messages: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    #[serde(default = "d_min_messages_for_summary")]
    pub min_messages_for_summary: usize,
    /// A re-summarization is rejected as degenerate when its length is at
    /// least this multiple of the previous summary's length.
    #[serde(default = "d_reconcat_guard_ratio")]
    pub reconcat_guard_ratio: f64,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            min_messages_for_summary: d_min_messages_for_summary(),
            reconcat_guard_ratio: d_reconcat_guard_ratio(),
        }
    }
}

fn d_min_messages_for_summary() -> usize {
    6
}
fn d_reconcat_guard_ratio() -> f64 {
    1.5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the agent-loop tool-approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Tool-name prefixes that must be approved by a human before execution.
    #[serde(default)]
    pub require_approval_for: Vec<String>,
    /// How long to wait for a human decision before treating it as denied.
    #[serde(default = "d_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Regex patterns that are denied outright, before a gate is even raised.
    #[serde(default)]
    pub auto_deny_patterns: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_approval_for: Vec::new(),
            approval_timeout_secs: d_approval_timeout(),
            auto_deny_patterns: Vec::new(),
        }
    }
}

impl ApprovalConfig {
    /// Whether `tool_name` requires an approval round-trip.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.require_approval_for
            .iter()
            .any(|prefix| tool_name.starts_with(prefix.as_str()))
    }
}

fn d_approval_timeout() -> u64 {
    120
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_escalation_order() {
        assert_eq!(Strategy::Direct.next(), Some(Strategy::LightPlanning));
        assert_eq!(Strategy::LightPlanning.next(), Some(Strategy::DeepReasoning));
        assert_eq!(Strategy::DeepReasoning.next(), None);
        assert!(Strategy::Direct < Strategy::LightPlanning);
    }

    #[test]
    fn threshold_lookup_matches_defaults() {
        let cfg = ReasoningConfig::default();
        assert!((cfg.threshold(Strategy::Direct) - 0.60).abs() < 1e-9);
        assert!((cfg.threshold(Strategy::LightPlanning) - 0.65).abs() < 1e-9);
        assert!((cfg.threshold(Strategy::DeepReasoning) - 0.60).abs() < 1e-9);
    }

    #[test]
    fn approval_prefix_match() {
        let cfg = ApprovalConfig {
            require_approval_for: vec!["exec".into(), "process.kill".into()],
            ..ApprovalConfig::default()
        };
        assert!(cfg.requires_approval("exec"));
        assert!(cfg.requires_approval("exec.run"));
        assert!(cfg.requires_approval("process.kill"));
        assert!(!cfg.requires_approval("read_file"));
    }
}
