//! The tool-approval gate consulted by the Agent Loop at S4c: some tools
//! require a human decision before they run. Denials and approvals are
//! scoped per tool-call batch — once a human says "approve all" or "deny
//! all", the remaining blocks in that same batch skip the gate entirely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use sa_domain::config::ApprovalConfig;
use sa_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// A single decision a human (or an auto-policy) can make about a pending
/// tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
    /// Approve this call and every remaining call in the same batch.
    ApproveAll,
    /// Deny this call and every remaining call in the same batch.
    DenyAll,
}

impl ApprovalDecision {
    fn approved(self) -> bool {
        matches!(self, ApprovalDecision::Approve | ApprovalDecision::ApproveAll)
    }

    fn is_batch_wide(self) -> bool {
        matches!(self, ApprovalDecision::ApproveAll | ApprovalDecision::DenyAll)
    }
}

/// What an approval consult ultimately materializes into, independent of
/// whether it came from a human reply, a timeout, or an auto-deny pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied { reason: DenialReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    AutoDenyPattern,
    HumanDenied,
    Timeout,
}

impl DenialReason {
    pub fn message(self) -> &'static str {
        match self {
            DenialReason::AutoDenyPattern => "denied by auto-deny policy",
            DenialReason::HumanDenied => "denied by reviewer",
            DenialReason::Timeout => "approval request timed out",
        }
    }
}

/// A tool call awaiting a human decision, as surfaced to `on_approval_required`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool_name: String,
    pub arguments_preview: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Channel an adapter implements to actually collect a human decision for a
/// `PendingApproval`. The default in-process channel in this crate is
/// `OneshotApprovalChannel`; a CLI/gateway adapter can implement its own
/// (e.g. backed by a websocket round-trip) against the same trait.
#[async_trait::async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Registers `pending` and returns once a decision is made, or `None` if
    /// `timeout` elapses with no reply.
    async fn request(&self, pending: PendingApproval, timeout: Duration) -> Option<ApprovalDecision>;
}

struct PendingEntry {
    reply: Option<oneshot::Sender<ApprovalDecision>>,
}

/// An in-process `ApprovalChannel`: the caller registers a reply sender and
/// some other task (a CLI prompt, a dashboard websocket handler) resolves it
/// by calling `respond`.
#[derive(Default)]
pub struct OneshotApprovalChannel {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl OneshotApprovalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a previously-registered pending request. A no-op if the id is
    /// unknown (already timed out, or never registered).
    pub fn respond(&self, id: &str, decision: ApprovalDecision) {
        let mut pending = self.pending.lock();
        if let Some(entry) = pending.remove(id) {
            if let Some(tx) = entry.reply {
                let _ = tx.send(decision);
            }
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ApprovalChannel for OneshotApprovalChannel {
    async fn request(&self, pending: PendingApproval, timeout: Duration) -> Option<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(pending.id.clone(), PendingEntry { reply: Some(tx) });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => Some(decision),
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().remove(&pending.id);
                None
            }
        }
    }
}

/// Batch-scoped state threaded through one S4 tool-call loop: once any
/// decision in the batch is `approve_all`/`deny_all`, every remaining block
/// takes that decision directly without consulting the gate again.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchDecision {
    pinned: Option<bool>,
}

impl BatchDecision {
    pub fn pinned_approval(&self) -> Option<bool> {
        self.pinned
    }

    fn pin(&mut self, approved: bool) {
        self.pinned = Some(approved);
    }
}

/// The approval gate: decides, per tool call, whether execution may proceed.
pub struct ApprovalGate {
    config: ApprovalConfig,
    auto_deny: Vec<Regex>,
    channel: Arc<dyn ApprovalChannel>,
}

impl ApprovalGate {
    pub fn new(config: ApprovalConfig, channel: Arc<dyn ApprovalChannel>) -> Result<Self> {
        let auto_deny = config
            .auto_deny_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("invalid auto_deny_patterns entry {p:?}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, auto_deny, channel })
    }

    /// Consults the gate for one tool call within a batch. `batch` carries
    /// any pinned decision from an earlier call in the same batch; on a
    /// fresh `approve_all`/`deny_all` this call pins it for the rest of the
    /// batch before returning.
    pub async fn consult(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        session_id: &str,
        batch: &mut BatchDecision,
        now: DateTime<Utc>,
    ) -> (ApprovalOutcome, Option<PendingApproval>) {
        if !self.config.requires_approval(tool_name) {
            return (ApprovalOutcome::Approved, None);
        }

        if let Some(pinned) = batch.pinned_approval() {
            return (
                if pinned {
                    ApprovalOutcome::Approved
                } else {
                    ApprovalOutcome::Denied { reason: DenialReason::HumanDenied }
                },
                None,
            );
        }

        if self.auto_deny.iter().any(|re| re.is_match(tool_name)) {
            return (ApprovalOutcome::Denied { reason: DenialReason::AutoDenyPattern }, None);
        }

        let pending = PendingApproval {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            arguments_preview: preview(arguments),
            session_id: session_id.to_string(),
            created_at: now,
        };

        let timeout = Duration::from_secs(self.config.approval_timeout_secs);
        let outcome = match self.channel.request(pending.clone(), timeout).await {
            Some(decision) => {
                if decision.is_batch_wide() {
                    batch.pin(decision.approved());
                }
                if decision.approved() {
                    ApprovalOutcome::Approved
                } else {
                    ApprovalOutcome::Denied { reason: DenialReason::HumanDenied }
                }
            }
            None => ApprovalOutcome::Denied { reason: DenialReason::Timeout },
        };
        (outcome, Some(pending))
    }
}

fn preview(arguments: &serde_json::Value) -> String {
    let s = arguments.to_string();
    const MAX: usize = 500;
    if s.len() > MAX {
        format!("{}...", &s[..MAX])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(require: Vec<&str>, deny_patterns: Vec<&str>, channel: Arc<dyn ApprovalChannel>) -> ApprovalGate {
        ApprovalGate::new(
            ApprovalConfig {
                require_approval_for: require.into_iter().map(String::from).collect(),
                approval_timeout_secs: 1,
                auto_deny_patterns: deny_patterns.into_iter().map(String::from).collect(),
            },
            channel,
        )
        .unwrap()
    }

    struct AlwaysApprove;
    #[async_trait::async_trait]
    impl ApprovalChannel for AlwaysApprove {
        async fn request(&self, _pending: PendingApproval, _timeout: Duration) -> Option<ApprovalDecision> {
            Some(ApprovalDecision::Approve)
        }
    }

    struct AlwaysTimeout;
    #[async_trait::async_trait]
    impl ApprovalChannel for AlwaysTimeout {
        async fn request(&self, _pending: PendingApproval, _timeout: Duration) -> Option<ApprovalDecision> {
            None
        }
    }

    #[tokio::test]
    async fn tools_without_a_matching_prefix_are_never_gated() {
        let gate = gate(vec!["exec"], vec![], Arc::new(AlwaysApprove));
        let mut batch = BatchDecision::default();
        let (outcome, pending) = gate
            .consult("read_file", &serde_json::json!({}), "s1", &mut batch, Utc::now())
            .await;
        assert_eq!(outcome, ApprovalOutcome::Approved);
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn auto_deny_pattern_short_circuits_before_the_channel_is_consulted() {
        let gate = gate(vec!["exec"], vec!["^exec\\.rm"], Arc::new(AlwaysApprove));
        let mut batch = BatchDecision::default();
        let (outcome, pending) = gate
            .consult("exec.rm", &serde_json::json!({}), "s1", &mut batch, Utc::now())
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied { reason: DenialReason::AutoDenyPattern });
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn timeout_without_a_reply_is_treated_as_denial() {
        let gate = gate(vec!["exec"], vec![], Arc::new(AlwaysTimeout));
        let mut batch = BatchDecision::default();
        let (outcome, _) = gate
            .consult("exec", &serde_json::json!({}), "s1", &mut batch, Utc::now())
            .await;
        assert_eq!(outcome, ApprovalOutcome::Denied { reason: DenialReason::Timeout });
    }

    #[tokio::test]
    async fn approve_all_pins_the_remaining_batch() {
        struct ApproveAllOnce;
        #[async_trait::async_trait]
        impl ApprovalChannel for ApproveAllOnce {
            async fn request(&self, _pending: PendingApproval, _timeout: Duration) -> Option<ApprovalDecision> {
                Some(ApprovalDecision::ApproveAll)
            }
        }
        let gate = gate(vec!["exec"], vec![], Arc::new(ApproveAllOnce));
        let mut batch = BatchDecision::default();

        let (first, _) = gate.consult("exec.a", &serde_json::json!({}), "s1", &mut batch, Utc::now()).await;
        assert_eq!(first, ApprovalOutcome::Approved);
        assert_eq!(batch.pinned_approval(), Some(true));

        // Second call in the same batch never touches the channel again.
        let (second, pending) = gate.consult("exec.b", &serde_json::json!({}), "s1", &mut batch, Utc::now()).await;
        assert_eq!(second, ApprovalOutcome::Approved);
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn oneshot_channel_resolves_on_respond() {
        let channel = Arc::new(OneshotApprovalChannel::new());
        let channel_clone = channel.clone();
        let pending = PendingApproval {
            id: "p1".into(),
            tool_name: "exec".into(),
            arguments_preview: "{}".into(),
            session_id: "s1".into(),
            created_at: Utc::now(),
        };
        let handle = tokio::spawn(async move { channel_clone.request(pending, Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        channel.respond("p1", ApprovalDecision::Deny);
        let decision = handle.await.unwrap();
        assert_eq!(decision, Some(ApprovalDecision::Deny));
    }
}
