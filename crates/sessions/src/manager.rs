//! The Session Manager (§4.8): owns every in-memory `Session`, tracks
//! which one is active, and is the only thing allowed to load/save a
//! `Session` through a `StateProvider`. Exactly one session is active at a
//! time; switching auto-saves the outgoing session before making the new
//! one current.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use sa_domain::config::ConversationConfig;
use sa_domain::conversation::Conversation;
use sa_domain::error::{Error, Result};
use sa_domain::session::{session_key, Session, StateProvider};

/// Legacy single-session deployments kept one session under this fixed
/// key. On first run against a state directory that has this key but no
/// `session:`-prefixed entries, the manager migrates it forward once so
/// existing installs don't lose history when upgrading to multi-session.
const LEGACY_SESSION_KEY: &str = "session_state";

pub struct SessionManager {
    state_provider: Arc<dyn StateProvider>,
    conversation_config: ConversationConfig,
    sessions: RwLock<HashMap<String, Session>>,
    active_id: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(state_provider: Arc<dyn StateProvider>, conversation_config: ConversationConfig) -> Self {
        Self {
            state_provider,
            conversation_config,
            sessions: RwLock::new(HashMap::new()),
            active_id: RwLock::new(None),
        }
    }

    /// Loads every persisted session, migrating a legacy single-session
    /// entry first if present. Leaves no session active; callers pick one
    /// (most recently active, or a freshly created one) afterward.
    pub async fn init(&self) -> Result<()> {
        self.migrate_legacy_session_if_present().await?;

        let keys = self.state_provider.list_keys("session:").await?;
        let mut sessions = self.sessions.write();
        for key in keys {
            let Some(value) = self.state_provider.load(&key).await? else {
                continue;
            };
            match serde_json::from_value::<Session>(value) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "dropping unreadable session record");
                }
            }
        }
        Ok(())
    }

    async fn migrate_legacy_session_if_present(&self) -> Result<()> {
        if !self.state_provider.exists(LEGACY_SESSION_KEY).await? {
            return Ok(());
        }
        let already_migrated = !self.state_provider.list_keys("session:").await?.is_empty();
        if already_migrated {
            return Ok(());
        }
        let Some(value) = self.state_provider.load(LEGACY_SESSION_KEY).await? else {
            return Ok(());
        };
        match serde_json::from_value::<Session>(value) {
            Ok(session) => {
                tracing::info!(session_id = %session.id, "migrating legacy single-session record");
                self.state_provider.save(&session_key(&session.id), serde_json::to_value(&session).map_err(Error::Json)?).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "legacy session record could not be parsed, leaving unmigrated");
            }
        }
        Ok(())
    }

    /// Creates a new, empty session and makes it active. Does not persist
    /// until the first `save_active` / auto-save.
    pub fn create_session(&self, title: impl Into<String>, model: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conversation = Conversation::new(self.conversation_config.clone(), now);
        let session = Session::new(id.clone(), title, model, conversation, now);
        self.sessions.write().insert(id.clone(), session);
        *self.active_id.write() = Some(id.clone());
        id
    }

    pub fn active_id(&self) -> Option<String> {
        self.active_id.read().clone()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Runs `f` against the active session, if any.
    pub fn with_active<R>(&self, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let active_id = self.active_id.read().clone()?;
        let sessions = self.sessions.read();
        sessions.get(&active_id).map(f)
    }

    /// Runs `f` against the active session mutably, if any.
    pub fn with_active_mut<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let active_id = self.active_id.read().clone()?;
        let mut sessions = self.sessions.write();
        sessions.get_mut(&active_id).map(f)
    }

    /// Clones `id`'s session out for an async caller that needs to mutate
    /// it across `.await` points (a sync `RwLock` guard can't span those).
    /// Pair with `replace_session` to write the result back.
    pub fn session_snapshot(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Overwrites `id`'s in-memory session with `session`. A no-op if `id`
    /// was removed (e.g. by a concurrent `quit`) while the caller held its
    /// snapshot.
    pub fn replace_session(&self, id: &str, session: Session) {
        let mut sessions = self.sessions.write();
        if let std::collections::hash_map::Entry::Occupied(mut entry) = sessions.entry(id.to_string()) {
            entry.insert(session);
        }
    }

    /// Switches to `id`, auto-saving the currently active session first
    /// (if one exists and differs from `id`). Returns an error if `id`
    /// doesn't name a known session.
    pub async fn switch_to(&self, id: &str) -> Result<()> {
        if !self.sessions.read().contains_key(id) {
            return Err(Error::Invariant(format!("no such session: {id}")));
        }
        let previous = self.active_id.read().clone();
        if let Some(previous) = &previous {
            if previous != id {
                self.save(previous).await?;
            }
        }
        *self.active_id.write() = Some(id.to_string());
        Ok(())
    }

    /// Persists one session by id.
    pub async fn save(&self, id: &str) -> Result<()> {
        let snapshot = {
            let sessions = self.sessions.read();
            sessions.get(id).cloned()
        };
        let Some(session) = snapshot else {
            return Ok(());
        };
        let value = serde_json::to_value(&session).map_err(Error::Json)?;
        self.state_provider.save(&session_key(id), value).await
    }

    /// Persists the active session, if any.
    pub async fn save_active(&self) -> Result<()> {
        let Some(id) = self.active_id.read().clone() else {
            return Ok(());
        };
        self.save(&id).await
    }

    /// Saves and removes `id` from memory. The persisted record remains on
    /// disk; this only clears the in-process map. If `id` was active, no
    /// session is active afterward.
    pub async fn quit(&self, id: &str) -> Result<()> {
        self.save(id).await?;
        self.sessions.write().remove(id);
        let mut active_id = self.active_id.write();
        if active_id.as_deref() == Some(id) {
            *active_id = None;
        }
        Ok(())
    }
}
