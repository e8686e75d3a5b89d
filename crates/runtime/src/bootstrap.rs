//! Process shape (§2.1): wires every component into one `Runtime`.
//!
//! Construction order mirrors the gateway's own bootstrap (load config,
//! validate, bring providers up, then everything that depends on them) but
//! stops short of anything presentation-shaped — no HTTP, no CLI parsing.

use std::sync::Arc;

use anyhow::Context;
use sa_domain::config::{Config, ConfigSeverity};
use sa_domain::event::EventBus;
use sa_domain::session::StateProvider;
use sa_mcp_client::{McpHost, McpProvider};
use sa_providers::LlmRouter;
use sa_reasoning::{
    AgentLoop, Analyzer, ApprovalChannel, ApprovalGate, CostCalculator, Evaluator, NullCallbacks, OneshotApprovalChannel,
    Planner, Scheduler,
};
use sa_sessions::{FileStateProvider, SessionManager, StateExtractor, StateUpdateService, SummarizationService};
use sa_tools::{DirectProvider, ProcessManager, ToolRegistry};

use crate::handle::RuntimeHandle;

/// Validates `config`, logging every issue at the severity the gateway
/// uses (warnings logged and ignored, any error aborts startup).
pub fn validate_or_bail(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }
    Ok(())
}

/// Builds every long-lived component and returns the narrow `RuntimeHandle`
/// entry point. Consumes `config` — nothing downstream needs to mutate it
/// again after construction.
pub async fn build_runtime(config: Config) -> anyhow::Result<RuntimeHandle> {
    tracing::info!("SerialAgent runtime starting");

    let events = Arc::new(EventBus::new());

    // ── LLM routing ──────────────────────────────────────────────────
    let router = Arc::new(LlmRouter::from_config(&config.llm).context("initializing LLM providers")?);
    if router.registry().is_empty() {
        tracing::warn!("no LLM providers initialized — runtime will build but every LLM call will fail until configured");
    } else {
        tracing::info!(providers = router.registry().len(), "LLM provider registry ready");
    }

    // ── MCP host ─────────────────────────────────────────────────────
    let mcp_host = McpHost::from_config(&config.mcp, events.clone()).await;
    tracing::info!(
        servers = mcp_host.server_count(),
        connected = mcp_host.connected_server_count(),
        "MCP host ready"
    );

    // ── Tool registry (direct + MCP providers) ──────────────────────
    let tools = Arc::new(ToolRegistry::new(config.conversation.enable_caching));
    let process_manager = ProcessManager::new(config.tools.exec.clone());
    tools
        .register_provider(Arc::new(DirectProvider::new(process_manager)))
        .context("registering direct tool provider")?;
    tools
        .register_provider(Arc::new(McpProvider::new(mcp_host.clone())))
        .context("registering MCP tool provider")?;
    tracing::info!("tool registry ready");

    // ── Session & state persistence ──────────────────────────────────
    let state_provider: Arc<dyn StateProvider> = Arc::new(FileStateProvider::new(config.state_provider.base_dir.clone()));
    let sessions = Arc::new(SessionManager::new(state_provider.clone(), config.conversation.clone()));
    sessions.init().await.context("loading persisted sessions")?;
    tracing::info!(sessions = sessions.list_ids().len(), "session manager ready");

    let extractor = Arc::new(StateExtractor::new(router.clone(), config.llm.pricing.clone()));
    let state_update = Arc::new(StateUpdateService::new(events.clone(), state_provider.clone()));
    let summarizer = Arc::new(SummarizationService::new(router.clone(), config.llm.pricing.clone(), config.summarization.clone()));

    // ── Reasoning scheduler ───────────────────────────────────────────
    let cost = CostCalculator::new(config.llm.pricing.clone());
    let approval_channel: Arc<dyn ApprovalChannel> = Arc::new(OneshotApprovalChannel::new());
    let approval = Arc::new(ApprovalGate::new(config.approval.clone(), approval_channel).context("compiling auto-deny patterns")?);
    let agent_loop = Arc::new(AgentLoop::new(router.clone(), tools.clone(), Some(approval), cost.clone()));
    let scheduler = Arc::new(Scheduler::new(
        config.reasoning.clone(),
        Analyzer::new(router.clone(), cost.clone()),
        Planner::new(router.clone(), cost.clone()),
        Evaluator::new(router.clone(), cost.clone()),
        agent_loop,
    ));
    tracing::info!("reasoning scheduler ready");

    Ok(RuntimeHandle::new(scheduler, sessions, extractor, state_update, summarizer, state_provider, mcp_host))
}

/// A `RuntimeCallbacks` that renders nothing, for callers with no UI of
/// their own to wire up yet.
pub fn null_callbacks() -> NullCallbacks {
    NullCallbacks
}
