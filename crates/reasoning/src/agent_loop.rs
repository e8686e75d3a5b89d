//! The Agent Loop (C6): one invocation of `run` drives the turn-by-turn
//! LLM-call / tool-dispatch / result-reinjection state machine described in
//! §4.6. The scheduler (C7) is the only intended caller, but the loop has no
//! dependency back on it — it only knows about a conversation, a tool
//! registry, an optional tracker, and an optional approval gate.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sa_domain::capability::ModelRole;
use sa_domain::conversation::Conversation;
use sa_domain::error::Result;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use sa_domain::tracker::{AttemptStatus, ProgressTracker};
use sa_providers::{ChatRequest, LlmRouter};
use sa_tools::ToolRegistry;
use serde_json::Value;

use crate::approval::{ApprovalGate, ApprovalOutcome, BatchDecision};
use crate::callbacks::RuntimeCallbacks;
use crate::cost::CostCalculator;

/// Outcome of one `run`: the final answer text plus the dollar cost of every
/// LLM turn spent producing it (not including tool execution, which has no
/// LLM cost of its own).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub cost: f64,
}

/// The main turn-by-turn driver. Cheap to construct; holds only shared
/// handles, no per-run state (that lives in the caller's `Conversation` and
/// `ProgressTracker`).
pub struct AgentLoop {
    router: Arc<LlmRouter>,
    tools: Arc<ToolRegistry>,
    approval: Option<Arc<ApprovalGate>>,
    cost: CostCalculator,
    max_tokens: Option<u32>,
}

impl AgentLoop {
    pub fn new(
        router: Arc<LlmRouter>,
        tools: Arc<ToolRegistry>,
        approval: Option<Arc<ApprovalGate>>,
        cost: CostCalculator,
    ) -> Self {
        Self { router, tools, approval, cost, max_tokens: None }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Runs the state machine described in §4.6 to completion and returns
    /// the final text. `streaming` controls whether tokens are fake-chunked
    /// to `callbacks.on_stream_chunk` as they arrive from the final
    /// (non-tool) turn; when the scheduler calls this in buffered mode it
    /// passes `streaming = false` so nothing reaches the UI before the
    /// answer has passed quality evaluation.
    pub async fn run(
        &self,
        query: &str,
        conversation: &mut Conversation,
        mut tracker: Option<&mut ProgressTracker>,
        session_id: &str,
        streaming: bool,
        callbacks: &dyn RuntimeCallbacks,
    ) -> Result<RunOutcome> {
        let now = Utc::now();
        // S0: append the user message, unless the query is empty (a
        // re-entry that relies entirely on prior conversation state).
        if !query.is_empty() {
            conversation.add_user_message(query, now);
        }

        let mut total_cost = 0.0;

        loop {
            // S1: build the request from the conversation's current view.
            let req = self.build_request(conversation).await;

            // S2: call the LLM. Non-stream path only for now — fake
            // chunking of the accepted final answer happens at S5, per the
            // scheduler's buffering discipline (§4.7).
            let response = self
                .router
                .chat_for_role(ModelRole::Executor, req)
                .await?;

            if let Some(usage) = &response.usage {
                let cost = self.cost.calculate_cost(&response.model, usage);
                total_cost += cost;
                callbacks.on_usage(usage, cost).await;
            }

            // S3: append the returned message to the conversation.
            let assistant_message = response_to_message(&response);
            conversation.add_assistant_message(assistant_message.clone(), Utc::now());

            if response.tool_calls.is_empty() {
                // S5: extract and return the concatenated text.
                let text = assistant_message.content.extract_all_text();
                if streaming {
                    for chunk in fake_chunks(&text, 20) {
                        callbacks.on_stream_chunk(chunk).await;
                        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
                    }
                    callbacks.on_stream_complete().await;
                }
                return Ok(RunOutcome { text, cost: total_cost });
            }

            // S4: dispatch every tool call in this batch.
            let mut batch = BatchDecision::default();
            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let arguments = normalize_tool_arguments(call.arguments.clone());
                let part = self
                    .dispatch_one_tool(&call.call_id, &call.tool_name, arguments, session_id, &mut tracker, &mut batch, callbacks)
                    .await;
                results.push(part);
            }
            conversation.add_tool_results(results, Utc::now());
            // goto S2
        }
    }

    async fn build_request(&self, conversation: &Conversation) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some((prompt, cache_control)) = conversation.system_for_api() {
            messages.push(Message::system(prompt).with_cache_control(cache_control));
        }
        messages.extend(conversation.messages_for_api());

        let tools = self
            .tools
            .get_tool_definitions_for_api()
            .await
            .into_iter()
            .map(|t| ToolDefinition { cache_control: t.cache_control, ..t.definition })
            .collect();

        ChatRequest {
            messages,
            tools,
            temperature: None,
            max_tokens: self.max_tokens,
            json_mode: false,
            model: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_one_tool(
        &self,
        call_id: &str,
        tool_name: &str,
        arguments: Value,
        session_id: &str,
        tracker: &mut Option<&mut ProgressTracker>,
        batch: &mut BatchDecision,
        callbacks: &dyn RuntimeCallbacks,
    ) -> ContentPart {
        // S4a: consult the tracker's dedup cache before anything else.
        if let Some(t) = tracker.as_deref() {
            let (execute, cached) = t.should_execute_tool(tool_name, &arguments);
            if !execute {
                let result = cached.unwrap_or_default();
                callbacks.on_tool_call(tool_name, &arguments).await;
                callbacks.on_tool_result(tool_name, &result, true).await;
                if let Some(t) = tracker.as_deref_mut() {
                    t.log_tool_execution(tool_name, arguments, current_strategy(t), true, Some(result.clone()), None, 0, Utc::now());
                }
                return ContentPart::ToolResult { tool_use_id: call_id.to_string(), content: result, is_error: false };
            }
        }

        callbacks.on_tool_call(tool_name, &arguments).await;

        // S4c: approval gate, if configured for this tool.
        if let Some(gate) = &self.approval {
            let (outcome, pending) = gate.consult(tool_name, &arguments, session_id, batch, Utc::now()).await;
            if let Some(pending) = &pending {
                callbacks.on_approval_required(pending).await;
            }
            if let ApprovalOutcome::Denied { reason } = outcome {
                let message = reason.message().to_string();
                callbacks.on_tool_result(tool_name, &message, false).await;
                if let Some(t) = tracker.as_deref_mut() {
                    t.log_tool_execution(tool_name, arguments, current_strategy(t), false, None, Some(message.clone()), 0, Utc::now());
                }
                return ContentPart::ToolResult { tool_use_id: call_id.to_string(), content: message, is_error: true };
            }
        }

        // S4d: execute, with wall-clock timing.
        let start = Instant::now();
        let outcome = self.tools.execute_tool(tool_name, arguments.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (content, is_error, success) = match outcome {
            Ok(text) => (text, false, true),
            Err(e) => (format!("Error executing tool '{tool_name}': {e}"), true, false),
        };

        callbacks.on_tool_result(tool_name, &content, success).await;
        if let Some(t) = tracker.as_deref_mut() {
            let strategy = current_strategy(t);
            if success {
                t.log_tool_execution(tool_name, arguments, strategy, true, Some(content.clone()), None, elapsed_ms, Utc::now());
            } else {
                t.log_tool_execution(tool_name, arguments, strategy, false, None, Some(content.clone()), elapsed_ms, Utc::now());
            }
        }

        ContentPart::ToolResult { tool_use_id: call_id.to_string(), content, is_error }
    }
}

fn current_strategy(tracker: &ProgressTracker) -> sa_domain::config::Strategy {
    tracker
        .attempts
        .last()
        .map(|a| a.strategy)
        .unwrap_or(sa_domain::config::Strategy::Direct)
}

/// Coerces whatever shape the provider handed back for tool-call arguments
/// into a JSON object, defaulting to an empty one — the registry's
/// providers expect string-keyed maps, not arbitrary JSON.
fn normalize_tool_arguments(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::Null => Value::Object(serde_json::Map::new()),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}

fn response_to_message(response: &sa_providers::ChatResponse) -> Message {
    if response.tool_calls.is_empty() {
        return Message::assistant(response.content.clone());
    }
    let mut parts = Vec::new();
    if !response.content.is_empty() {
        parts.push(ContentPart::Text { text: response.content.clone() });
    }
    for call in &response.tool_calls {
        parts.push(ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });
    }
    Message { role: Role::Assistant, content: MessageContent::Parts(parts), cache_control: None }
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

    #[test]
    fn fake_chunks_splits_on_char_boundaries() {
        let text = "hello world, this is a test of chunking";
        let chunks = fake_chunks(text, 10);
        assert_eq!(chunks.join(""), text);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn fake_chunks_handles_multibyte_text() {
        let text = "héllo wörld with accénts repeated enough to cross a boundary";
        let chunks = fake_chunks(text, 5);
        assert_eq!(chunks.join(""), text);
    }

    #[test]
    fn fake_chunks_empty_text_yields_no_chunks() {
        assert!(fake_chunks("", 20).is_empty());
    }

    #[test]
    fn normalize_tool_arguments_wraps_non_object_values() {
        let normalized = normalize_tool_arguments(Value::String("x".into()));
        assert_eq!(normalized, serde_json::json!({"value": "x"}));
        let normalized_null = normalize_tool_arguments(Value::Null);
        assert_eq!(normalized_null, serde_json::json!({}));
        let obj = serde_json::json!({"a": 1});
        assert_eq!(normalize_tool_arguments(obj.clone()), obj);
    }

    #[test]
    fn response_to_message_with_tool_calls_has_parts() {
        use sa_domain::tool::ToolCall;
        let response = sa_providers::ChatResponse {
            content: "thinking...".into(),
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "echo".into(),
                arguments: serde_json::json!({"msg": "hi"}),
            }],
            usage: None,
            model: "m".into(),
            finish_reason: Some("tool_calls".into()),
        };
        let msg = response_to_message(&response);
        match msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ToolUse { .. }));
            }
            _ => panic!("expected Parts"),
        }
    }
}
