//! The session summarization service (§4.8): a separate, idempotent
//! service that keeps `Session::conversation_summary` current without
//! re-summarizing the whole transcript on every call. Runs under a
//! per-session lock so two concurrent summarization requests for the same
//! session never race.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use sa_domain::capability::ModelRole;
use sa_domain::config::{ModelPricing, SummarizationConfig};
use sa_domain::session::Session;
use sa_domain::tool::{Message, Role};
use sa_providers::{ChatRequest, LlmRouter};

/// What `update_session_summary` did, surfaced to the caller for logging /
/// testing rather than silently mutating the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Skipped { reason: &'static str },
    Updated { covers_through_index: usize },
}

impl SummaryOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SummaryOutcome::Skipped { .. })
    }
}

pub struct SummarizationService {
    router: Arc<LlmRouter>,
    pricing: HashMap<String, ModelPricing>,
    config: SummarizationConfig,
    /// One lock per session id, created lazily. Guards the read-summarize-write
    /// sequence in `update_session_summary` so overlapping calls for the same
    /// session serialize instead of racing on `summary_last_message_index`.
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SummarizationService {
    pub fn new(router: Arc<LlmRouter>, pricing: HashMap<String, ModelPricing>, config: SummarizationConfig) -> Self {
        Self {
            router,
            pricing,
            config,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Reads `session`'s messages from `summary_last_message_index` onward,
    /// folds them into the existing summary, and updates the session in
    /// place. Idempotent: calling this twice with no new messages in
    /// between yields `Skipped` both times.
    pub async fn update_session_summary(&self, session: &mut Session) -> SummaryOutcome {
        let lock = self.lock_for(&session.id);
        let _guard = lock.lock().await;

        let total = session.conversation.messages().len();
        if total < self.config.min_messages_for_summary {
            return SummaryOutcome::Skipped { reason: "fewer messages than min_messages_for_summary" };
        }
        if session.summary_last_message_index >= total {
            return SummaryOutcome::Skipped { reason: "no new messages since last summary" };
        }

        let new_text = render_messages(&session.conversation.messages()[session.summary_last_message_index..]);
        if new_text.trim().is_empty() {
            return SummaryOutcome::Skipped { reason: "no textual content in new messages" };
        }

        let prompt = summarization_prompt(session.conversation_summary.as_deref(), &new_text);
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.0),
            max_tokens: Some(600),
            ..Default::default()
        };

        let resp = match self.router.chat_for_role(ModelRole::Summarizer, req).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "summarization call failed, skipping");
                return SummaryOutcome::Skipped { reason: "llm call failed" };
            }
        };

        if let Some(usage) = &resp.usage {
            let cost = self
                .pricing
                .get(&resp.model)
                .map(|p| p.estimate_cost(usage.prompt_tokens, usage.completion_tokens))
                .unwrap_or(0.0);
            session.summarization_cost += cost;
        }

        let candidate = resp.content.trim().to_string();
        if candidate.is_empty() {
            return SummaryOutcome::Skipped { reason: "model returned an empty summary" };
        }

        if let Some(prev) = &session.conversation_summary {
            if is_degenerate_reconcat(prev, &candidate, self.config.reconcat_guard_ratio) {
                tracing::warn!(session_id = %session.id, "rejected degenerate duplicate-concatenation summary");
                return SummaryOutcome::Skipped { reason: "degenerate duplicate-concatenation output rejected" };
            }
        }

        session.conversation_summary = Some(candidate);
        session.summary_last_message_index = total;
        SummaryOutcome::Updated { covers_through_index: total }
    }
}

/// A re-summarization is rejected when it looks like the model just
/// concatenated the old summary onto new text without actually
/// compressing it: starts with the previous summary and is at least
/// `ratio`x longer. At exactly `ratio`, reject (inclusive per spec).
fn is_degenerate_reconcat(previous: &str, candidate: &str, ratio: f64) -> bool {
    candidate.starts_with(previous) && (candidate.len() as f64) >= (previous.len() as f64) * ratio
}

fn render_messages(messages: &[sa_domain::tool::Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let text = m.content.extract_all_text();
            if text.trim().is_empty() {
                return None;
            }
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            Some(format!("{role}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarization_prompt(existing: Option<&str>, new_text: &str) -> String {
    match existing {
        Some(existing) => format!(
            "Here is the running summary of a conversation so far:\n\n{existing}\n\n\
             Here are the new messages since that summary:\n\n{new_text}\n\n\
             Write an updated summary that incorporates the new messages. Do not \
             simply repeat the old summary followed by the new text — compress \
             the whole conversation into one coherent summary."
        ),
        None => format!(
            "Summarize this conversation concisely, preserving the key facts and \
             decisions:\n\n{new_text}"
        ),
    }
}
