//! The State Update Service (§4.8): the only thing allowed to mutate a
//! session's `SessionState` sub-aggregates. Takes the State Extractor's
//! best-effort output for one exchange, folds it in, publishes a
//! `StateChanged` event, and fires a non-blocking persistence write.
//!
//! Persistence is fire-and-forget by design: a state update that failed to
//! persist is a durability gap, not a correctness one — the in-memory
//! `SessionState` is already updated and the next successful save will
//! catch up.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use sa_domain::event::{DomainEvent, EventBus};
use sa_domain::session::{session_state_key, SessionState, StateProvider};

use crate::extractor::Extraction;

pub struct StateUpdateService {
    events: Arc<EventBus>,
    state_provider: Arc<dyn StateProvider>,
}

impl StateUpdateService {
    pub fn new(events: Arc<EventBus>, state_provider: Arc<dyn StateProvider>) -> Self {
        Self { events, state_provider }
    }

    /// Applies one extraction to `state`, publishes what changed, and
    /// kicks off a background save. `session_id` is only used for the
    /// event payload and the persistence key, not to look anything up —
    /// callers own locating the right `SessionState`.
    pub fn apply_extraction(&self, session_id: &str, state: &mut SessionState, extraction: &Extraction) {
        let mut changed = false;

        if !extraction.profile_updates.is_empty() {
            for (k, v) in &extraction.profile_updates {
                state.user_profile.insert(k.clone(), v.clone());
            }
            changed = true;
            self.publish_change(session_id, "user_profile", "merged", json!({ "keys": extraction.profile_updates.keys().collect::<Vec<_>>() }));
        }

        if !extraction.facts.is_empty() {
            for fact in &extraction.facts {
                if !state.knowledge_base.confirmed_facts.contains(fact) {
                    state.knowledge_base.confirmed_facts.push(fact.clone());
                }
            }
            state.knowledge_base.last_updated = Some(Utc::now());
            changed = true;
            self.publish_change(session_id, "knowledge_base", "facts_added", json!({ "count": extraction.facts.len() }));
        }

        if let Some(intent) = &extraction.intent {
            state.interaction_context.current_topic = Some(intent.clone());
            state.interaction_context.push_intent(intent.clone());
            changed = true;
            self.publish_change(session_id, "interaction_context", "intent_recorded", json!({ "intent": intent }));
        }

        if changed {
            state.metadata.last_extracted_at = Some(Utc::now());
            self.spawn_persist(session_id, state);
        }
    }

    fn publish_change(&self, session_id: &str, component: &str, change_type: &str, details: serde_json::Value) {
        self.events.publish(DomainEvent::StateChanged {
            session_id: session_id.to_string(),
            component: component.to_string(),
            change_type: change_type.to_string(),
            details,
        });
    }

    /// Serializes `state` now (cheap, in-memory) and hands the write off to
    /// a background task so `apply_extraction` never blocks its caller on
    /// disk I/O.
    fn spawn_persist(&self, session_id: &str, state: &SessionState) {
        let key = session_state_key(session_id);
        let value = match serde_json::to_value(state) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to serialize session state, skipping persist");
                return;
            }
        };
        let provider = self.state_provider.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = provider.save(&key, value).await {
                tracing::error!(session_id, error = %e, "background session state persist failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use sa_domain::error::Result;
    use serde_json::Value;

    #[derive(Default)]
    struct InMemoryProvider {
        data: StdMutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl StateProvider for InMemoryProvider {
        async fn save(&self, key: &str, value: Value) -> Result<()> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
        async fn load(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.data.lock().unwrap().contains_key(key))
        }
        async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(self.data.lock().unwrap().keys().cloned().collect())
        }
    }

    fn extraction_with_fact(fact: &str) -> Extraction {
        Extraction {
            profile_updates: HashMap::new(),
            facts: vec![fact.to_string()],
            intent: None,
            cost: 0.0,
        }
    }

    #[tokio::test]
    async fn applying_an_extraction_merges_profile_and_facts() {
        let events = Arc::new(EventBus::new());
        let provider: Arc<dyn StateProvider> = Arc::new(InMemoryProvider::default());
        let service = StateUpdateService::new(events.clone(), provider.clone());

        let mut state = SessionState::default();
        let mut profile_updates = HashMap::new();
        profile_updates.insert("name".to_string(), "Alex".to_string());
        let extraction = Extraction {
            profile_updates,
            facts: vec!["likes Rust".to_string()],
            intent: Some("introduce_self".to_string()),
            cost: 0.0,
        };

        service.apply_extraction("s1", &mut state, &extraction);

        assert_eq!(state.user_profile.get("name"), Some(&"Alex".to_string()));
        assert_eq!(state.knowledge_base.confirmed_facts, vec!["likes Rust".to_string()]);
        assert_eq!(state.interaction_context.current_topic.as_deref(), Some("introduce_self"));
    }

    #[tokio::test]
    async fn duplicate_facts_are_not_appended_twice() {
        let events = Arc::new(EventBus::new());
        let provider: Arc<dyn StateProvider> = Arc::new(InMemoryProvider::default());
        let service = StateUpdateService::new(events, provider);

        let mut state = SessionState::default();
        service.apply_extraction("s1", &mut state, &extraction_with_fact("likes Rust"));
        service.apply_extraction("s1", &mut state, &extraction_with_fact("likes Rust"));

        assert_eq!(state.knowledge_base.confirmed_facts.len(), 1);
    }

    #[tokio::test]
    async fn empty_extraction_publishes_nothing_and_does_not_persist() {
        let events = Arc::new(EventBus::new());
        let provider: Arc<dyn StateProvider> = Arc::new(InMemoryProvider::default());
        let service = StateUpdateService::new(events, provider.clone());

        let mut state = SessionState::default();
        service.apply_extraction("s1", &mut state, &Extraction::default());

        assert!(provider.load(&session_state_key("s1")).await.unwrap().is_none());
    }
}
