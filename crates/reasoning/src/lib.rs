//! Adaptive reasoning: query-complexity analysis, strategy-specific
//! planning, the turn-by-turn Agent Loop, quality evaluation, the
//! tool-approval gate, and the Scheduler that ties them together into one
//! `run`.

mod agent_loop;
mod analyzer;
mod approval;
mod callbacks;
mod cost;
mod evaluator;
mod json_extract;
mod planner;
mod scheduler;

pub use agent_loop::{AgentLoop, RunOutcome};
pub use analyzer::Analyzer;
pub use approval::{
    ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalOutcome, BatchDecision, DenialReason,
    OneshotApprovalChannel, PendingApproval,
};
pub use callbacks::{NullCallbacks, RuntimeCallbacks};
pub use cost::CostCalculator;
pub use evaluator::Evaluator;
pub use planner::Planner;
pub use scheduler::{Scheduler, SchedulerOutcome};
