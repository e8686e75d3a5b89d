//! `RuntimeHandle` (§2.1): the one entry point a presentation adapter
//! (TUI, CLI, HTTP handler — none of which this crate builds) calls into.
//! Everything behind it — provider routing, tool dispatch, MCP, session
//! persistence, state extraction, summarization — is an implementation
//! detail of `run_query`.

use std::sync::Arc;

use chrono::Utc;
use sa_domain::error::{Error, Result};
use sa_domain::session::{session_state_key, SessionState, StateProvider};
use sa_mcp_client::McpHost;
use sa_reasoning::{RuntimeCallbacks, Scheduler};
use sa_sessions::{SessionManager, StateExtractor, StateUpdateService, SummarizationService};

/// A live, fully-wired runtime. Cheap to clone: every field is already an
/// `Arc` or, for `McpHost`, cheaply `Clone` in its own right.
#[derive(Clone)]
pub struct RuntimeHandle {
    scheduler: Arc<Scheduler>,
    sessions: Arc<SessionManager>,
    extractor: Arc<StateExtractor>,
    state_update: Arc<StateUpdateService>,
    summarizer: Arc<SummarizationService>,
    state_provider: Arc<dyn StateProvider>,
    mcp_host: McpHost,
}

impl RuntimeHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<Scheduler>,
        sessions: Arc<SessionManager>,
        extractor: Arc<StateExtractor>,
        state_update: Arc<StateUpdateService>,
        summarizer: Arc<SummarizationService>,
        state_provider: Arc<dyn StateProvider>,
        mcp_host: McpHost,
    ) -> Self {
        Self { scheduler, sessions, extractor, state_update, summarizer, state_provider, mcp_host }
    }

    /// Creates a new session and makes it active, returning its id. A
    /// convenience for adapters that have no session of their own yet.
    pub fn create_session(&self, title: impl Into<String>, model: impl Into<String>) -> String {
        self.sessions.create_session(title, model)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.list_ids()
    }

    /// Runs one query against `session_id` through the reasoning scheduler,
    /// then folds its side effects back in: the accepted answer's cost,
    /// the run's tracker, best-effort state extraction, and an incremental
    /// summary refresh. Returns the final answer text.
    ///
    /// The session is snapshotted out of the manager, mutated locally
    /// across the run's `.await` points, and written back at the end —
    /// the manager's lock is synchronous and can't be held across them.
    pub async fn run_query(&self, session_id: &str, query: &str, callbacks: &dyn RuntimeCallbacks) -> Result<String> {
        let mut session = self
            .sessions
            .session_snapshot(session_id)
            .ok_or_else(|| Error::Invariant(format!("no such session: {session_id}")))?;

        let outcome = self
            .scheduler
            .run(query, &mut session.conversation, session_id, false, callbacks)
            .await?;

        let now = Utc::now();
        session.conversation_cost += outcome.conversation_cost;
        session.reasoning_cost += outcome.reasoning_cost;
        session.attach_tracker(uuid::Uuid::new_v4().to_string(), outcome.tracker, now);

        let extraction = self.extractor.extract(query, &outcome.text).await;
        let mut state = self.load_session_state(session_id).await?;
        self.state_update.apply_extraction(session_id, &mut state, &extraction);

        let summary_outcome = self.summarizer.update_session_summary(&mut session).await;
        if let sa_sessions::SummaryOutcome::Updated { covers_through_index } = summary_outcome {
            tracing::debug!(session_id, covers_through_index, "conversation summary refreshed");
        }

        self.sessions.replace_session(session_id, session);
        self.sessions.save(session_id).await?;

        Ok(outcome.text)
    }

    async fn load_session_state(&self, session_id: &str) -> Result<SessionState> {
        match self.state_provider.load(&session_state_key(session_id)).await? {
            Some(value) => serde_json::from_value(value).map_err(Error::Json),
            None => Ok(SessionState::default()),
        }
    }

    /// Graceful shutdown: persists the active session (if any) and tears
    /// down every MCP connection.
    pub async fn shutdown(&self) -> Result<()> {
        self.sessions.save_active().await?;
        self.mcp_host.shutdown().await;
        Ok(())
    }
}
