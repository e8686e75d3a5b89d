//! The conversation store (C4): an ordered, append-only message log with
//! cache-control placement computed at read time, history truncation, and
//! round-trip serialization.
//!
//! Cache-control placement never mutates the stored log — `messages_for_api`
//! returns a shallow copy with ephemeral markers applied to the stable
//! prefix regions (system prompt, last user message).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConversationConfig;
pub use crate::tool::{CacheControl, CacheControlKind};
use crate::tool::{ContentPart, Message, MessageContent, Role};

/// The ordered sequence of messages, plus an optional system prompt and
/// the conversation-scoped config. Owned exclusively by a `Session` (§3
/// Ownership); the `ReasoningScheduler`/`AgentLoop` only ever borrow it for
/// the duration of one `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    config: ConversationConfig,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(config: ConversationConfig, now: DateTime<Utc>) -> Self {
        Self {
            system_prompt: None,
            messages: Vec::new(),
            config,
            created_at: now,
            last_modified_at: now,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    /// Every message in insertion order, untruncated and without
    /// cache-control markers — the raw append log.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn add_user_message(&mut self, content: impl Into<String>, now: DateTime<Utc>) {
        self.messages.push(Message::user(content));
        self.last_modified_at = now;
    }

    pub fn add_assistant_message(&mut self, message: Message, now: DateTime<Utc>) {
        debug_assert_eq!(message.role, Role::Assistant);
        self.messages.push(message);
        self.last_modified_at = now;
    }

    /// Append a single user message carrying all tool_result blocks for one
    /// batch, in the order of their corresponding tool_use blocks.
    pub fn add_tool_results(&mut self, results: Vec<ContentPart>, now: DateTime<Utc>) {
        debug_assert!(results.iter().all(|p| matches!(p, ContentPart::ToolResult { .. })));
        self.messages.push(Message {
            role: Role::User,
            content: MessageContent::Parts(results),
            cache_control: None,
        });
        self.last_modified_at = now;
    }

    /// Empties the log but preserves the system prompt.
    pub fn clear_history(&mut self, now: DateTime<Utc>) {
        self.messages.clear();
        self.last_modified_at = now;
    }

    /// Returns a cache-control-annotated, history-truncated, shallow copy
    /// of the log suitable for sending to the LLM wire contract. Never
    /// mutates `self.messages`.
    pub fn messages_for_api(&self) -> Vec<Message> {
        let view = self.truncated_view();
        let last_user_idx = view.iter().rposition(|m| m.role == Role::User);

        view.into_iter()
            .enumerate()
            .map(|(i, m)| {
                let cache_control = if self.config.enable_caching && Some(i) == last_user_idx {
                    Some(CacheControl::EPHEMERAL)
                } else {
                    None
                };
                m.with_cache_control(cache_control)
            })
            .collect()
    }

    /// The system prompt as it would be sent: a single cached text block
    /// when caching is enabled and a prompt is set.
    pub fn system_for_api(&self) -> Option<(String, Option<CacheControl>)> {
        self.system_prompt.as_ref().map(|p| {
            let cc = if self.config.enable_caching {
                Some(CacheControl::EPHEMERAL)
            } else {
                None
            };
            (p.clone(), cc)
        })
    }

    /// Applies `max_history_messages` truncation: drop from the front until
    /// the limit is met, then repair by also dropping a now-orphaned leading
    /// tool_result message (invariant iii — never drop a tool_result without
    /// its tool_use).
    fn truncated_view(&self) -> Vec<Message> {
        let Some(limit) = self.config.max_history_messages else {
            return self.messages.clone();
        };

        if self.messages.len() <= limit {
            return self.messages.clone();
        }

        let drop_count = self.messages.len() - limit;
        let mut start = drop_count;

        // Repair: if the new first message opens with a tool_result block,
        // its matching tool_use was dropped — drop it too.
        while start < self.messages.len() && message_is_orphan_tool_result(&self.messages[start]) {
            start += 1;
        }

        self.messages[start..].to_vec()
    }

    /// 4 characters per token, over system prompt + all text-block content.
    /// Non-text blocks (tool_use, tool_result, image) contribute zero.
    pub fn estimate_tokens(&self) -> usize {
        let mut chars = self.system_prompt.as_ref().map(|s| s.len()).unwrap_or(0);
        for m in &self.messages {
            if let MessageContent::Parts(parts) = &m.content {
                for p in parts {
                    if let ContentPart::Text { text } = p {
                        chars += text.len();
                    }
                }
            } else if let MessageContent::Text(t) = &m.content {
                chars += t.len();
            }
        }
        chars.div_ceil(4)
    }

    /// Validates invariant (ii): every tool_use block in an assistant
    /// message is answered by exactly one tool_result block (by id) in the
    /// immediately following message.
    pub fn validate_tool_pairing(&self) -> Result<(), String> {
        for (i, m) in self.messages.iter().enumerate() {
            let MessageContent::Parts(parts) = &m.content else {
                continue;
            };
            if m.role != Role::Assistant {
                continue;
            }
            let tool_use_ids: Vec<&str> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect();
            if tool_use_ids.is_empty() {
                continue;
            }
            let Some(next) = self.messages.get(i + 1) else {
                return Err(format!(
                    "assistant message {i} has tool_use blocks but no following message"
                ));
            };
            if next.role != Role::User {
                return Err(format!(
                    "message following tool_use at index {i} is not role=user"
                ));
            }
            let MessageContent::Parts(next_parts) = &next.content else {
                return Err(format!("message following tool_use at index {i} has no parts"));
            };
            for id in &tool_use_ids {
                let count = next_parts
                    .iter()
                    .filter(|p| matches!(p, ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == id))
                    .count();
                if count != 1 {
                    return Err(format!(
                        "tool_use {id} at message {i} has {count} matching tool_result blocks (expected 1)"
                    ));
                }
            }
        }
        Ok(())
    }
}

fn message_is_orphan_tool_result(m: &Message) -> bool {
    matches!(
        &m.content,
        MessageContent::Parts(parts) if parts.first().is_some_and(|p| matches!(p, ContentPart::ToolResult { .. }))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cfg() -> ConversationConfig {
        ConversationConfig {
            enable_caching: true,
            max_history_messages: None,
        }
    }

    #[test]
    fn round_trip_for_messages_system_and_config() {
        let mut conv = Conversation::new(cfg(), t(0)).with_system_prompt("be helpful");
        conv.add_user_message("hi", t(1));
        conv.add_assistant_message(Message::assistant("hello"), t(2));

        let json = serde_json::to_string(&conv).unwrap();
        let restored: Conversation = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.messages().len(), conv.messages().len());
        assert_eq!(restored.system_prompt(), conv.system_prompt());
        assert_eq!(restored.config().enable_caching, conv.config().enable_caching);
    }

    #[test]
    fn cache_control_marks_last_user_message_only() {
        let mut conv = Conversation::new(cfg(), t(0));
        conv.add_user_message("first", t(1));
        conv.add_assistant_message(Message::assistant("reply"), t(2));
        conv.add_user_message("second", t(3));

        let api = conv.messages_for_api();
        assert!(api[0].cache_control.is_none());
        assert!(api[1].cache_control.is_none());
        assert!(api[2].cache_control.is_some());
    }

    #[test]
    fn cache_control_applying_twice_yields_same_view() {
        let mut conv = Conversation::new(cfg(), t(0));
        conv.add_user_message("hi", t(1));
        let a = conv.messages_for_api();
        let b = conv.messages_for_api();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn truncation_drops_from_front_and_repairs_orphan_tool_result() {
        let mut conv = Conversation::new(
            ConversationConfig {
                enable_caching: false,
                max_history_messages: Some(2),
            },
            t(0),
        );
        conv.add_user_message("q1", t(1));
        conv.add_assistant_message(
            Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse {
                    id: "c1".into(),
                    name: "echo".into(),
                    input: serde_json::json!({}),
                }]),
                cache_control: None,
            },
            t(2),
        );
        conv.add_tool_results(
            vec![ContentPart::ToolResult {
                tool_use_id: "c1".into(),
                content: "x".into(),
                is_error: false,
            }],
            t(3),
        );
        conv.add_assistant_message(Message::assistant("done"), t(4));

        // limit=2 would normally keep the last 2 messages (tool_result, done),
        // but the tool_result is orphaned (its tool_use was dropped), so it
        // must be dropped too, leaving just ["done"].
        let view = conv.messages_for_api();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].content.extract_all_text(), "done");
    }

    #[test]
    fn max_history_zero_yields_empty_view_but_keeps_system_prompt() {
        let mut conv = Conversation::new(
            ConversationConfig {
                enable_caching: true,
                max_history_messages: Some(0),
            },
            t(0),
        )
        .with_system_prompt("sys");
        conv.add_user_message("hi", t(1));

        assert!(conv.messages_for_api().is_empty());
        assert!(conv.system_for_api().is_some());
    }

    #[test]
    fn clear_history_preserves_system_prompt() {
        let mut conv = Conversation::new(cfg(), t(0)).with_system_prompt("sys");
        conv.add_user_message("hi", t(1));
        conv.clear_history(t(2));
        assert!(conv.is_empty());
        assert_eq!(conv.system_prompt(), Some("sys"));
    }

    #[test]
    fn validate_tool_pairing_accepts_well_formed_conversation() {
        let mut conv = Conversation::new(cfg(), t(0));
        conv.add_user_message("q", t(1));
        conv.add_assistant_message(
            Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse {
                    id: "c1".into(),
                    name: "echo".into(),
                    input: serde_json::json!({}),
                }]),
                cache_control: None,
            },
            t(2),
        );
        conv.add_tool_results(
            vec![ContentPart::ToolResult {
                tool_use_id: "c1".into(),
                content: "x".into(),
                is_error: false,
            }],
            t(3),
        );
        assert!(conv.validate_tool_pairing().is_ok());
    }

    #[test]
    fn validate_tool_pairing_rejects_missing_tool_result() {
        let mut conv = Conversation::new(cfg(), t(0));
        conv.add_user_message("q", t(1));
        conv.add_assistant_message(
            Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse {
                    id: "c1".into(),
                    name: "echo".into(),
                    input: serde_json::json!({}),
                }]),
                cache_control: None,
            },
            t(2),
        );
        conv.add_assistant_message(Message::assistant("oops, no tool result"), t(3));
        assert!(conv.validate_tool_pairing().is_err());
    }

    #[test]
    fn estimate_tokens_ignores_non_text_blocks() {
        let mut conv = Conversation::new(cfg(), t(0));
        conv.add_assistant_message(
            Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: "1234".into() }, // 4 chars
                    ContentPart::ToolUse {
                        id: "c1".into(),
                        name: "echo".into(),
                        input: serde_json::json!({"a": "bbbbbbbbbb"}),
                    },
                ]),
                cache_control: None,
            },
            t(1),
        );
        assert_eq!(conv.estimate_tokens(), 1);
    }
}
