//! The Session aggregate (C8): the durable unit a user switches between.
//! A session exclusively owns its Conversation and its Trackers; the
//! Reasoning Scheduler only ever borrows them for the duration of one
//! `run`. This module also defines the `StateProvider` contract that
//! session persistence and the state-update service's sub-aggregates are
//! built on — concrete file-backed and in-memory implementations live in
//! `sa-sessions`, which depends on this crate rather than the reverse.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Conversation;
use crate::error::Result;
use crate::tracker::ProgressTracker;

/// Free-form, extractor-populated profile fields. Intentionally loose: the
/// State Extractor fills these in best-effort and nothing downstream
/// depends on their shape beyond serializability.
pub type UserProfile = HashMap<String, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub confirmed_facts: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A bounded ring of the most recent intents; `push` evicts from the front
/// once `capacity` is exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionContext {
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub recent_intents: Vec<String>,
    #[serde(default = "default_intent_capacity")]
    capacity: usize,
}

fn default_intent_capacity() -> usize {
    20
}

impl Default for InteractionContext {
    fn default() -> Self {
        Self {
            current_topic: None,
            recent_intents: Vec::new(),
            capacity: default_intent_capacity(),
        }
    }
}

impl InteractionContext {
    pub fn push_intent(&mut self, intent: impl Into<String>) {
        self.recent_intents.push(intent.into());
        if self.recent_intents.len() > self.capacity {
            let overflow = self.recent_intents.len() - self.capacity;
            self.recent_intents.drain(0..overflow);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    #[serde(default = "default_state_version")]
    pub version: u32,
    #[serde(default)]
    pub last_extracted_at: Option<DateTime<Utc>>,
}

fn default_state_version() -> u32 {
    1
}

impl Default for StateMetadata {
    fn default() -> Self {
        Self {
            version: default_state_version(),
            last_extracted_at: None,
        }
    }
}

/// The four sub-aggregates the State Update Service mutates in response to
/// domain events, bundled for convenient persistence alongside a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub knowledge_base: KnowledgeBase,
    #[serde(default)]
    pub interaction_context: InteractionContext,
    #[serde(default)]
    pub metadata: StateMetadata,
}

/// A session exclusively owns its Conversation and its Trackers, keyed by
/// the id of the query that created them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub model: String,
    pub conversation: Conversation,
    #[serde(default)]
    pub trackers: HashMap<String, ProgressTracker>,
    #[serde(default)]
    pub conversation_cost: f64,
    #[serde(default)]
    pub reasoning_cost: f64,
    #[serde(default)]
    pub summarization_cost: f64,
    #[serde(default)]
    pub conversation_summary: Option<String>,
    #[serde(default)]
    pub summary_last_message_index: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        model: impl Into<String>,
        conversation: Conversation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            model: model.into(),
            conversation,
            trackers: HashMap::new(),
            conversation_cost: 0.0,
            reasoning_cost: 0.0,
            summarization_cost: 0.0,
            conversation_summary: None,
            summary_last_message_index: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Attach a completed run's tracker, as happens at `run` completion
    /// (trackers are created fresh at the start of each run and only
    /// become part of the session once the run finishes).
    pub fn attach_tracker(&mut self, query_id: impl Into<String>, tracker: ProgressTracker, now: DateTime<Utc>) {
        self.trackers.insert(query_id.into(), tracker);
        self.last_active_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State Provider contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pluggable key-value store. Every operation may suspend; no
/// implementation guarantees cross-process atomicity — callers are
/// expected to be single-writer, consistent with the Session aggregate's
/// ownership rules.
#[async_trait::async_trait]
pub trait StateProvider: Send + Sync {
    async fn save(&self, key: &str, value: Value) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// `session:<id>` for the session itself, `session_state_<id>` for its
/// sub-aggregate bundle. Keys never contain path separators.
pub fn session_key(id: &str) -> String {
    format!("session:{id}")
}

pub fn session_state_key(id: &str) -> String {
    format!("session_state_{id}")
}

/// Sanitizes a provider key into a filesystem-safe basename, as the
/// file-backed provider does before writing `<sanitized>.json`. Any
/// character that is not alphanumeric, `-`, or `_` becomes `_`, so a key
/// can never escape the provider's base directory.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_context_ring_evicts_from_front() {
        let mut ctx = InteractionContext {
            capacity: 3,
            ..Default::default()
        };
        for i in 0..5 {
            ctx.push_intent(format!("intent{i}"));
        }
        assert_eq!(ctx.recent_intents, vec!["intent2", "intent3", "intent4"]);
    }

    #[test]
    fn sanitize_key_strips_path_separators() {
        assert_eq!(sanitize_key("session_state_../../etc/passwd"), "session_state_______etc_passwd");
    }

    #[test]
    fn key_layout_matches_the_documented_scheme() {
        assert_eq!(session_key("abc"), "session:abc");
        assert_eq!(session_state_key("abc"), "session_state_abc");
    }
}
