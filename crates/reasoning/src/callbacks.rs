//! The UI-facing callback surface for the Agent Loop and Reasoning
//! Scheduler. Every method has a no-op default so an adapter only overrides
//! what it actually renders; the runtime awaits every call regardless of
//! whether the concrete implementation does anything.

use sa_domain::config::Strategy;
use sa_domain::stream::Usage;
use sa_domain::tracker::{Complexity, Evaluation, ProgressTracker};
use serde_json::Value;

use crate::approval::PendingApproval;

/// Callback surface implemented by UI/CLI adapters. Kept separate from the
/// domain event bus (`sa_domain::event::EventBus`): this trait is the
/// synchronous-per-run narration channel, the bus is the cross-service one.
#[async_trait::async_trait]
pub trait RuntimeCallbacks: Send + Sync {
    async fn on_start(&self) {}

    async fn on_stream_chunk(&self, _text: &str) {}

    async fn on_stream_complete(&self) {}

    async fn on_tool_call(&self, _name: &str, _input: &Value) {}

    async fn on_tool_result(&self, _name: &str, _text: &str, _success: bool) {}

    async fn on_usage(&self, _usage: &Usage, _cost: f64) {}

    /// Fired only when the approval gate is actually consulted for a tool
    /// call (i.e. not auto-approved, not already covered by an
    /// approve_all/deny_all decision earlier in the same batch).
    async fn on_approval_required(&self, _pending: &PendingApproval) {}

    async fn on_analysis_start(&self) {}

    async fn on_analysis_complete(&self, _complexity: &Complexity) {}

    async fn on_strategy_selected(&self, _strategy: Strategy, _reason: &str) {}

    async fn on_planning_start(&self) {}

    async fn on_planning_complete(&self, _step_count: usize, _mode: &str) {}

    async fn on_quality_check_start(&self) {}

    async fn on_quality_check_complete(&self, _evaluation: &Evaluation) {}

    async fn on_response_for_judgment(&self, _response: &str, _strategy: Strategy) {}

    async fn on_auto_escalation(&self, _from: Strategy, _to: Strategy, _reason: &str, _confidence: f64) {}

    async fn on_final_response(&self, _strategy: Strategy, _attempts: usize, _quality: f64, _escalated: bool) {}

    async fn on_tracker_complete(&self, _tracker: &ProgressTracker, _query: &str) {}

    async fn on_step_progress(&self, _step_id: &str, _status: &str, _description: &str) {}
}

/// A callback implementation that renders nothing. Used by callers that want
/// the agent loop's return value without any narration (e.g. batch jobs,
/// tests).
pub struct NullCallbacks;

#[async_trait::async_trait]
impl RuntimeCallbacks for NullCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_callbacks_accept_every_call_without_panicking() {
        let cb = NullCallbacks;
        cb.on_start().await;
        cb.on_stream_chunk("x").await;
        cb.on_stream_complete().await;
        cb.on_tool_call("echo", &Value::Null).await;
        cb.on_tool_result("echo", "ok", true).await;
    }
}
